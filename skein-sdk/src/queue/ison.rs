//! ISON requests and 303 replies.
//!
//! ISON has no end-of-list numeric: the single 303 line is both the reply
//! and the end. Requests too long for one line are split, and the pieces
//! are stitched back together so the caller sees one reply and one end.

use super::{Callback, Entry, Outcome, Placement, Queue, QueryEvent, chunk_words, finish_chain, split_callback};
use crate::frontend::Control;
use crate::registry::ServerRef;

/// Room left on an ISON line once the command itself is accounted for.
const ISON_LINE_MAX: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsonReply {
    /// Requested nicks the server reported, in the server's spelling.
    pub online: Vec<String>,
    /// Requested nicks the server left out.
    pub offline: Vec<String>,
}

impl IsonReply {
    fn build(requested: &[String], text: &str) -> Self {
        let present: Vec<&str> = text.split_whitespace().collect();
        let mut reply = Self::default();
        for nick in requested {
            match present.iter().find(|p| p.eq_ignore_ascii_case(nick)) {
                Some(p) => reply.online.push(p.to_string()),
                None => reply.offline.push(nick.clone()),
            }
        }
        reply
    }

    fn merge(&mut self, other: &IsonReply) {
        self.online.extend(other.online.iter().cloned());
        self.offline.extend(other.offline.iter().cloned());
    }
}

pub struct IsonQueue {
    inner: Queue<Vec<String>, IsonReply>,
}

impl IsonQueue {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            inner: Queue::new(Some(max_in_flight)),
        }
    }

    /// Queue a request for `nicks`. Returns the lines to send now.
    pub fn request(&mut self, nicks: &[String], callback: Option<Callback<IsonReply>>) -> Vec<String> {
        let chunks = chunk_words("ISON", nicks, ISON_LINE_MAX, usize::MAX);
        if chunks.is_empty() {
            return Vec::new();
        }
        let callbacks: Vec<Option<Callback<IsonReply>>> = match callback {
            Some(cb) if chunks.len() > 1 => split_callback(aggregate(cb), chunks.len())
                .into_iter()
                .map(Some)
                .collect(),
            Some(cb) => vec![Some(cb)],
            None => (0..chunks.len()).map(|_| None).collect(),
        };
        let mut wires = Vec::new();
        for (chunk, cb) in chunks.into_iter().zip(callbacks) {
            let wire = format!("ISON {}", chunk.join(" "));
            if self.inner.enqueue(Entry::new(wire.clone(), chunk, cb)) == Placement::Dispatch {
                wires.push(wire);
            }
        }
        wires
    }

    /// A 303 line; `text` is its trailing argument.
    pub fn on_reply(&mut self, server: ServerRef, text: &str, ctl: &mut Control) -> Outcome {
        let mut out = Outcome::default();
        if self.inner.is_empty() {
            tracing::debug!(server = %server, "Unsolicited ISON reply");
            out.display.push(format!("Online: {text}"));
            return out;
        }
        let mut shown = false;
        for entry in self.inner.head_chain_mut() {
            entry.dirty = true;
            let reply = IsonReply::build(&entry.criteria, text);
            if !entry.deliver(server, QueryEvent::Reply(&reply), ctl) && !shown {
                out.display.push(format!("Online: {}", reply.online.join(" ")));
                if !reply.offline.is_empty() {
                    out.display.push(format!("Offline: {}", reply.offline.join(" ")));
                }
                shown = true;
            }
        }
        finish_chain(self.inner.pop_chain(), server, ctl);
        out.send = self.inner.promote();
        out
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

/// Collect partial replies and hand the callback one merged reply before
/// its end.
fn aggregate(mut cb: Callback<IsonReply>) -> Callback<IsonReply> {
    let mut acc = IsonReply::default();
    Box::new(move |server, event, ctl| match event {
        QueryEvent::Reply(part) => acc.merge(part),
        QueryEvent::End => {
            cb(server, QueryEvent::Reply(&acc), &mut *ctl);
            cb(server, QueryEvent::End, ctl);
        }
    })
}
