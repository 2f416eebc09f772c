//! WHO requests and their 352/354/315 replies.

use super::{Callback, Entry, Outcome, Queue, QueryEvent, finish_chain};
use crate::frontend::Control;
use crate::gate::ignore::Pattern;
use crate::registry::ServerRef;

/// WHOX field letters in the order servers send them back.
pub const WHOX_FIELDS: &str = "tcuihsnfdlaor";

/// Query token we put on every WHOX request.
pub const WHOX_TOKEN: &str = "314";

/// Client-side filters applied to each reply line before delivery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhoFilter {
    /// `Some(true)`: IRC operators only; `Some(false)`: non-operators only.
    pub oper: Option<bool>,
    /// `Some(true)`: away users only; `Some(false)`: present users only.
    pub away: Option<bool>,
    /// `Some(true)`: channel operators only; `Some(false)`: everyone else.
    pub chanop: Option<bool>,
    pub nick: Option<Pattern>,
    pub user: Option<Pattern>,
    pub host: Option<Pattern>,
    pub server: Option<Pattern>,
    pub realname: Option<Pattern>,
}

impl WhoFilter {
    pub fn matches(&self, r: &WhoReply) -> bool {
        let flag = |want: Option<bool>, have: bool| want.is_none_or(|w| w == have);
        let pat = |p: &Option<Pattern>, s: &str| p.as_ref().is_none_or(|p| p.matches(s));
        flag(self.oper, r.is_oper())
            && flag(self.away, r.is_away())
            && flag(self.chanop, r.is_chanop())
            && pat(&self.nick, &r.nick)
            && pat(&self.user, &r.user)
            && pat(&self.host, &r.host)
            && pat(&self.server, &r.server)
            && pat(&self.realname, &r.realname)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhoRequest {
    /// A channel, mask, or comma-joined list of them.
    pub target: String,
    pub filter: WhoFilter,
    /// WHOX field letters; `None` sends a classic WHO.
    pub whox: Option<String>,
    /// The server reports unknown targets with 401/402/403 instead of an
    /// empty list and 315.
    pub dalnet: bool,
}

impl WhoRequest {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: WhoFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Ask for WHOX fields (letters from [`WHOX_FIELDS`]); the query token
    /// is always added.
    pub fn with_whox(mut self, fields: &str) -> Self {
        let wanted: String = WHOX_FIELDS
            .chars()
            .filter(|c| *c == 't' || fields.contains(*c))
            .collect();
        self.whox = Some(wanted);
        self
    }

    pub fn dalnet(mut self) -> Self {
        self.dalnet = true;
        self
    }

    /// The protocol line for this request.
    pub fn wire_line(&self) -> String {
        let oper = if self.filter.oper == Some(true) { "o" } else { "" };
        match &self.whox {
            Some(fields) => format!("WHO {} {oper}%{fields},{WHOX_TOKEN}", self.target),
            None if oper.is_empty() => format!("WHO {}", self.target),
            None => format!("WHO {} {oper}", self.target),
        }
    }
}

/// One user line from 352 or 354.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhoReply {
    pub channel: String,
    pub user: String,
    pub host: String,
    pub server: String,
    pub nick: String,
    /// `H`/`G` followed by `*` (operator) and membership prefixes.
    pub status: String,
    pub hops: Option<u32>,
    pub realname: String,
    pub ip: Option<String>,
    pub account: Option<String>,
    pub idle: Option<u64>,
    pub oplevel: Option<String>,
}

impl WhoReply {
    /// `<me> <channel> <user> <host> <server> <nick> <status> :<hops> <realname>`
    pub fn from_whoreply(args: &[String]) -> Option<Self> {
        if args.len() < 7 {
            return None;
        }
        let last = args.get(7).map(String::as_str).unwrap_or("");
        let (hops, realname) = match last.split_once(' ') {
            Some((h, r)) => (h.parse().ok(), r.to_string()),
            None => (last.parse().ok(), String::new()),
        };
        Some(Self {
            channel: args[1].clone(),
            user: args[2].clone(),
            host: args[3].clone(),
            server: args[4].clone(),
            nick: args[5].clone(),
            status: args[6].clone(),
            hops,
            realname,
            ..Self::default()
        })
    }

    /// Map a 354 line back onto named fields using the letters we asked
    /// for. Returns the reply and the query token, if any.
    pub fn from_whox(args: &[String], fields: &str) -> (Self, Option<String>) {
        let mut reply = Self::default();
        let mut token = None;
        let values = args.iter().skip(1);
        let letters = WHOX_FIELDS.chars().filter(|c| fields.contains(*c));
        for (letter, value) in letters.zip(values) {
            let v = value.clone();
            match letter {
                't' => token = Some(v),
                'c' => reply.channel = v,
                'u' => reply.user = v,
                'i' => reply.ip = Some(v),
                'h' => reply.host = v,
                's' => reply.server = v,
                'n' => reply.nick = v,
                'f' => reply.status = v,
                'd' => reply.hops = v.parse().ok(),
                'l' => reply.idle = v.parse().ok(),
                'a' => reply.account = (v != "0").then_some(v),
                'o' => reply.oplevel = Some(v),
                'r' => reply.realname = v,
                _ => {}
            }
        }
        (reply, token)
    }

    pub fn is_away(&self) -> bool {
        self.status.starts_with('G')
    }

    pub fn is_oper(&self) -> bool {
        self.status.contains('*')
    }

    pub fn is_chanop(&self) -> bool {
        self.status.contains('@')
    }

    pub fn display_line(&self) -> String {
        let channel = if self.channel.is_empty() { "*" } else { &self.channel };
        format!(
            "{:<12} {:<9} {:<3} {}@{} ({})",
            channel, self.nick, self.status, self.user, self.host, self.realname
        )
    }
}

#[derive(Debug)]
pub struct WhoCriteria {
    pub request: WhoRequest,
    /// Targets of a comma-joined request not yet closed by a 315.
    remaining: Vec<String>,
}

impl WhoCriteria {
    fn new(request: WhoRequest) -> Self {
        let remaining = request
            .target
            .split(',')
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();
        Self { request, remaining }
    }

    fn names(&self, target: &str) -> bool {
        let t = target.to_lowercase();
        self.request.target.eq_ignore_ascii_case(target) || self.remaining.contains(&t)
    }
}

pub struct WhoQueue {
    inner: Queue<WhoCriteria, WhoReply>,
}

impl Default for WhoQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WhoQueue {
    pub fn new() -> Self {
        Self { inner: Queue::new(None) }
    }

    /// Queue a request. Returns the line to send, or `None` when it rides
    /// on an identical request already queued.
    pub fn request(&mut self, request: WhoRequest, callback: Option<Callback<WhoReply>>) -> Option<String> {
        let wire = request.wire_line();
        let entry = Entry::new(wire.clone(), WhoCriteria::new(request), callback);
        match self.inner.enqueue(entry) {
            super::Placement::Dispatch => Some(wire),
            _ => None,
        }
    }

    /// A 352 line.
    pub fn on_reply(&mut self, server: ServerRef, reply: &WhoReply, ctl: &mut Control) -> Outcome {
        if self.inner.is_empty() {
            tracing::debug!(server = %server, nick = %reply.nick, "Unsolicited WHO reply");
            self.inner
                .push_front(Entry::new(String::new(), WhoCriteria::new(WhoRequest::new("*")), None));
        }
        self.deliver(server, reply, ctl)
    }

    /// A 354 line. `None` if nothing queued asked for WHOX.
    pub fn on_whox(&mut self, server: ServerRef, args: &[String], ctl: &mut Control) -> Option<Outcome> {
        let fields = self.inner.head()?.criteria.request.whox.clone()?;
        let (reply, token) = WhoReply::from_whox(args, &fields);
        if token.as_deref().is_some_and(|t| t != WHOX_TOKEN) {
            tracing::warn!(server = %server, token = ?token, "WHOX reply with foreign token");
        }
        Some(self.deliver(server, &reply, ctl))
    }

    fn deliver(&mut self, server: ServerRef, reply: &WhoReply, ctl: &mut Control) -> Outcome {
        let mut out = Outcome::default();
        let mut shown = false;
        for entry in self.inner.head_chain_mut() {
            entry.dirty = true;
            if !entry.criteria.request.filter.matches(reply) {
                continue;
            }
            if !entry.deliver(server, QueryEvent::Reply(reply), ctl) && !shown {
                out.display.push(reply.display_line());
                shown = true;
            }
        }
        out
    }

    /// A 315 line echoing `target`. `None` if the queue is empty.
    pub fn on_end(&mut self, server: ServerRef, target: &str, ctl: &mut Control) -> Option<Outcome> {
        let head = self.inner.head_mut()?;
        head.dirty = true;
        let crit = &mut head.criteria;
        let complete = if target == "*" || crit.request.target.eq_ignore_ascii_case(target) {
            true
        } else {
            let t = target.to_lowercase();
            match crit.remaining.iter().position(|r| *r == t) {
                Some(pos) => {
                    crit.remaining.remove(pos);
                    crit.remaining.is_empty()
                }
                None => {
                    tracing::warn!(
                        server = %server,
                        expected = %crit.request.target,
                        got = %target,
                        "WHO end does not match the pending request"
                    );
                    true
                }
            }
        };
        if !complete {
            return Some(Outcome::default());
        }
        let label = crit.request.target.clone();
        let chain = self.inner.pop_chain();
        let mut out = Outcome::default();
        if finish_chain(chain, server, ctl) > 0 {
            out.display.push(format!("End of WHO list for {label}"));
        }
        Some(out)
    }

    /// 401/402/403 naming `target`. Only a dalnet-style request at the head
    /// treats that as the end of its reply.
    pub fn on_error(&mut self, server: ServerRef, target: &str, ctl: &mut Control) -> Option<Outcome> {
        let head = self.inner.head()?;
        if !head.criteria.request.dalnet || !head.criteria.names(target) {
            return None;
        }
        self.on_end(server, target, ctl)
    }

    pub fn clear(&mut self) -> usize {
        self.inner.clear()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    fn server() -> ServerRef {
        ServerRef { refnum: 0, generation: 1 }
    }

    fn args(line: &str) -> Vec<String> {
        crate::message::Message::parse(line).args
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, tag: &str) -> Callback<WhoReply> {
        let log = log.clone();
        let tag = tag.to_string();
        Box::new(move |_, ev, _| {
            log.lock().push(match ev {
                QueryEvent::Reply(r) => format!("{tag}:{}", r.nick),
                QueryEvent::End => format!("{tag}:END"),
            })
        })
    }

    fn reply(nick: &str, status: &str) -> WhoReply {
        WhoReply::from_whoreply(&args(&format!(
            ":srv 352 me #c u{nick} host.example srv.example {nick} {status} :0 Real {nick}"
        )))
        .unwrap()
    }

    #[test]
    fn parses_352() {
        let r = reply("bob", "G*@");
        assert_eq!(r.nick, "bob");
        assert_eq!(r.user, "ubob");
        assert_eq!(r.hops, Some(0));
        assert_eq!(r.realname, "Real bob");
        assert!(r.is_away() && r.is_oper() && r.is_chanop());
    }

    #[test]
    fn back_to_back_requests_share_one_line() {
        let log = Log::default();
        let mut q = WhoQueue::new();
        let mut ctl = Control::new();
        assert_eq!(q.request(WhoRequest::new("#chan"), Some(recorder(&log, "a"))), Some("WHO #chan".into()));
        assert_eq!(q.request(WhoRequest::new("#chan"), Some(recorder(&log, "b"))), None);

        q.on_reply(server(), &reply("bob", "H"), &mut ctl);
        q.on_end(server(), "#chan", &mut ctl);
        assert_eq!(*log.lock(), vec!["a:bob", "b:bob", "a:END", "b:END"]);
        assert!(q.is_empty());
    }

    #[test]
    fn filters_apply_per_entry() {
        let log = Log::default();
        let mut q = WhoQueue::new();
        let mut ctl = Control::new();
        let ops = WhoFilter { chanop: Some(true), ..WhoFilter::default() };
        let here = WhoFilter { away: Some(false), ..WhoFilter::default() };
        q.request(WhoRequest::new("#c").with_filter(ops), Some(recorder(&log, "ops")));
        q.request(WhoRequest::new("#c").with_filter(here), Some(recorder(&log, "here")));

        q.on_reply(server(), &reply("op", "G@"), &mut ctl);
        q.on_reply(server(), &reply("pleb", "H"), &mut ctl);
        q.on_end(server(), "#c", &mut ctl);
        assert_eq!(*log.lock(), vec!["ops:op", "here:pleb", "ops:END", "here:END"]);
    }

    #[test]
    fn pattern_filter() {
        let f = WhoFilter { host: Some(Pattern::new("*.example")), ..WhoFilter::default() };
        assert!(f.matches(&reply("x", "H")));
        let f = WhoFilter { nick: Some(Pattern::new("a*")), ..WhoFilter::default() };
        assert!(!f.matches(&reply("x", "H")));
    }

    #[test]
    fn multi_target_pops_after_every_target_in_any_order() {
        let log = Log::default();
        let mut q = WhoQueue::new();
        let mut ctl = Control::new();
        q.request(WhoRequest::new("#a,#b,#c"), Some(recorder(&log, "m")));
        q.request(WhoRequest::new("#next"), Some(recorder(&log, "n")));

        q.on_end(server(), "#b", &mut ctl);
        q.on_end(server(), "#c", &mut ctl);
        assert_eq!(q.len(), 2);
        q.on_end(server(), "#A", &mut ctl);
        assert_eq!(q.len(), 1);
        assert_eq!(*log.lock(), vec!["m:END"]);
    }

    #[test]
    fn star_echo_completes_multi_target() {
        let mut q = WhoQueue::new();
        let mut ctl = Control::new();
        q.request(WhoRequest::new("#a,#b"), None);
        let out = q.on_end(server(), "*", &mut ctl).unwrap();
        assert!(q.is_empty());
        assert_eq!(out.display, vec!["End of WHO list for #a,#b"]);
    }

    #[test]
    fn unmatched_end_completes_head() {
        let mut q = WhoQueue::new();
        let mut ctl = Control::new();
        q.request(WhoRequest::new("#a"), None);
        q.request(WhoRequest::new("#b"), None);
        q.on_end(server(), "#zzz", &mut ctl);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn unsolicited_reply_gets_a_wildcard_entry() {
        let mut q = WhoQueue::new();
        let mut ctl = Control::new();
        let out = q.on_reply(server(), &reply("bob", "H"), &mut ctl);
        assert_eq!(out.display.len(), 1);
        assert_eq!(q.len(), 1);
        q.on_end(server(), "#whatever", &mut ctl);
        assert!(q.is_empty());
        assert!(q.on_end(server(), "#c", &mut ctl).is_none());
    }

    #[test]
    fn dalnet_errors_end_only_dalnet_requests() {
        let mut q = WhoQueue::new();
        let mut ctl = Control::new();
        q.request(WhoRequest::new("ghost"), None);
        assert!(q.on_error(server(), "ghost", &mut ctl).is_none());
        q.clear();

        q.request(WhoRequest::new("ghost").dalnet(), None);
        assert!(q.on_error(server(), "other", &mut ctl).is_none());
        assert!(q.on_error(server(), "ghost", &mut ctl).is_some());
        assert!(q.is_empty());
    }

    #[test]
    fn whox_wire_and_reply_mapping() {
        let req = WhoRequest::new("#c").with_whox("nuhra");
        assert_eq!(req.wire_line(), "WHO #c %tuhnar,314");
        let mut q = WhoQueue::new();
        let mut ctl = Control::new();
        let log = Log::default();
        q.request(req, Some(recorder(&log, "x")));
        let out = q
            .on_whox(server(), &args(":srv 354 me 314 ident host.x bob acct :Bob B"), &mut ctl)
            .unwrap();
        assert!(out.display.is_empty());
        assert_eq!(*log.lock(), vec!["x:bob"]);

        let (r, token) = WhoReply::from_whox(&args(":srv 354 me 314 ident host.x bob 0 :Bob B"), "tuhnar");
        assert_eq!(token.as_deref(), Some("314"));
        assert_eq!(r.account, None);
        assert_eq!(r.realname, "Bob B");
    }

    #[test]
    fn oper_filter_asks_the_server_too() {
        let f = WhoFilter { oper: Some(true), ..WhoFilter::default() };
        assert_eq!(WhoRequest::new("*.fi").with_filter(f).wire_line(), "WHO *.fi o");
    }
}
