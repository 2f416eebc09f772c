//! Reply correlation for WHO, ISON and USERHOST.
//!
//! IRC replies carry no request id, so each connection keeps one ordered
//! queue per query type and assumes the server answers in order. The head
//! of the queue owns whatever reply lines arrive.
//!
//! A request whose wire line is identical to the tail entry's, while that
//! entry has not seen any reply yet, rides along on it: no second line is
//! sent and both callbacks see the same replies. Queues may cap the number
//! of wire requests in flight; entries over the cap wait and are promoted
//! in order as dispatched ones finish.

pub mod ison;
pub mod userhost;
pub mod who;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::frontend::Control;
use crate::registry::ServerRef;

static NEXT_REFNUM: AtomicU64 = AtomicU64::new(1);

/// Process-wide, monotonically increasing entry number.
pub fn next_refnum() -> u64 {
    NEXT_REFNUM.fetch_add(1, Ordering::Relaxed)
}

/// What a query callback is told.
#[derive(Debug)]
pub enum QueryEvent<'a, T> {
    Reply(&'a T),
    /// No more replies for this request. Delivered exactly once.
    End,
}

pub type Callback<T> = Box<dyn FnMut(ServerRef, QueryEvent<'_, T>, &mut Control) + Send>;

pub struct Entry<C, T> {
    pub refnum: u64,
    /// The protocol line this entry sends, also the piggyback key.
    pub wire: String,
    pub criteria: C,
    /// Has seen at least one reply line.
    pub dirty: bool,
    /// Satisfied by the wire request of the entry before it.
    pub rider: bool,
    pub issued: Instant,
    callback: Option<Callback<T>>,
}

impl<C, T> Entry<C, T> {
    pub fn new(wire: String, criteria: C, callback: Option<Callback<T>>) -> Self {
        Self {
            refnum: next_refnum(),
            wire,
            criteria,
            dirty: false,
            rider: false,
            issued: Instant::now(),
            callback,
        }
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Invoke the callback. Returns `false` when there is none and the
    /// caller should fall back to default display.
    pub fn deliver(&mut self, server: ServerRef, event: QueryEvent<'_, T>, ctl: &mut Control) -> bool {
        match self.callback.as_mut() {
            Some(cb) => {
                cb(server, event, ctl);
                true
            }
            None => false,
        }
    }
}

impl<C: std::fmt::Debug, T> std::fmt::Debug for Entry<C, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("refnum", &self.refnum)
            .field("wire", &self.wire)
            .field("criteria", &self.criteria)
            .field("dirty", &self.dirty)
            .field("rider", &self.rider)
            .finish_non_exhaustive()
    }
}

/// Where [`Queue::enqueue`] put a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Send the entry's wire line now.
    Dispatch,
    /// Rides on an earlier identical request; send nothing.
    Piggyback,
    /// Held back by the in-flight cap.
    Wait,
}

pub struct Queue<C, T> {
    active: VecDeque<Entry<C, T>>,
    waiting: VecDeque<Entry<C, T>>,
    max_in_flight: Option<usize>,
}

impl<C, T> Queue<C, T> {
    pub fn new(max_in_flight: Option<usize>) -> Self {
        Self {
            active: VecDeque::new(),
            waiting: VecDeque::new(),
            max_in_flight: max_in_flight.map(|n| n.max(1)),
        }
    }

    pub fn enqueue(&mut self, mut entry: Entry<C, T>) -> Placement {
        let tail = self.waiting.back().or_else(|| self.active.back());
        if tail.is_some_and(|t| !t.dirty && t.wire == entry.wire) {
            entry.rider = true;
            if self.waiting.is_empty() {
                self.active.push_back(entry);
            } else {
                self.waiting.push_back(entry);
            }
            return Placement::Piggyback;
        }
        if !self.waiting.is_empty() || self.at_cap() {
            self.waiting.push_back(entry);
            return Placement::Wait;
        }
        self.active.push_back(entry);
        Placement::Dispatch
    }

    /// Wire requests currently dispatched.
    pub fn in_flight(&self) -> usize {
        self.active.iter().filter(|e| !e.rider).count()
    }

    fn at_cap(&self) -> bool {
        self.max_in_flight.is_some_and(|cap| self.in_flight() >= cap)
    }

    pub fn head(&self) -> Option<&Entry<C, T>> {
        self.active.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut Entry<C, T>> {
        self.active.front_mut()
    }

    /// The head entry and the riders directly behind it.
    pub fn head_chain_mut(&mut self) -> impl Iterator<Item = &mut Entry<C, T>> {
        let n = self.chain_len();
        self.active.iter_mut().take(n)
    }

    fn chain_len(&self) -> usize {
        match self.active.front() {
            None => 0,
            Some(_) => 1 + self.active.iter().skip(1).take_while(|e| e.rider).count(),
        }
    }

    /// Remove the head chain.
    pub fn pop_chain(&mut self) -> Vec<Entry<C, T>> {
        let n = self.chain_len();
        self.active.drain(..n).collect()
    }

    /// Move waiting entries (with their riders) into the dispatched set
    /// while under the cap. Returns the wire lines to send.
    pub fn promote(&mut self) -> Vec<String> {
        let mut wires = Vec::new();
        while !self.waiting.is_empty() && !self.at_cap() {
            let Some(mut first) = self.waiting.pop_front() else {
                break;
            };
            first.rider = false;
            wires.push(first.wire.clone());
            self.active.push_back(first);
            while self.waiting.front().is_some_and(|e| e.rider) {
                if let Some(rider) = self.waiting.pop_front() {
                    self.active.push_back(rider);
                }
            }
        }
        wires
    }

    /// Put an entry at the head without dispatching anything; used when a
    /// reply arrives for a request we have no record of.
    pub fn push_front(&mut self, entry: Entry<C, T>) {
        self.active.push_front(entry);
    }

    /// Drop every entry without invoking callbacks.
    pub fn clear(&mut self) -> usize {
        let n = self.active.len() + self.waiting.len();
        self.active.clear();
        self.waiting.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.waiting.is_empty()
    }
}

/// Result of feeding one reply line to a queue.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Default-display text for entries without a callback.
    pub display: Vec<String>,
    /// Wire lines for entries promoted out of the wait list.
    pub send: Vec<String>,
}

/// Split one callback across `parts` entries. Replies from every part are
/// forwarded; `End` is forwarded once, when the last part ends.
pub(crate) fn split_callback<T: 'static>(callback: Callback<T>, parts: usize) -> Vec<Callback<T>> {
    let shared = Arc::new(Mutex::new((callback, parts)));
    (0..parts)
        .map(|_| {
            let shared = shared.clone();
            let part: Callback<T> = Box::new(move |server, event, ctl| {
                let mut guard = shared.lock();
                let (cb, remaining) = &mut *guard;
                match event {
                    QueryEvent::Reply(r) => cb(server, QueryEvent::Reply(r), ctl),
                    QueryEvent::End => {
                        *remaining = remaining.saturating_sub(1);
                        if *remaining == 0 {
                            cb(server, QueryEvent::End, ctl);
                        }
                    }
                }
            });
            part
        })
        .collect()
}

/// Group `items` so that `prefix` plus the space-joined group fits in
/// `max_len` bytes and no group exceeds `max_items`.
pub(crate) fn chunk_words(prefix: &str, items: &[String], max_len: usize, max_items: usize) -> Vec<Vec<String>> {
    let mut chunks: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut len = prefix.len();
    for item in items.iter().filter(|i| !i.is_empty()) {
        let extra = item.len() + 1;
        if !current.is_empty() && (len + extra > max_len || current.len() >= max_items) {
            chunks.push(std::mem::take(&mut current));
            len = prefix.len();
        }
        len += extra;
        current.push(item.clone());
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Deliver `End` to every entry in a popped chain. Returns how many had no
/// callback.
pub(crate) fn finish_chain<C, T>(chain: Vec<Entry<C, T>>, server: ServerRef, ctl: &mut Control) -> usize {
    let mut silent = 0;
    for mut entry in chain {
        tracing::debug!(
            server = %server,
            refnum = entry.refnum,
            elapsed_ms = entry.issued.elapsed().as_millis() as u64,
            "Query complete"
        );
        if !entry.deliver(server, QueryEvent::End, ctl) {
            silent += 1;
        }
    }
    silent
}

#[cfg(test)]
mod tests {
    use super::*;

    type Q = Queue<(), String>;

    fn entry(wire: &str) -> Entry<(), String> {
        Entry::new(wire.to_string(), (), None)
    }

    #[test]
    fn identical_clean_requests_piggyback() {
        let mut q = Q::new(None);
        assert_eq!(q.enqueue(entry("WHO #c")), Placement::Dispatch);
        assert_eq!(q.enqueue(entry("WHO #c")), Placement::Piggyback);
        assert_eq!(q.enqueue(entry("WHO #d")), Placement::Dispatch);
        assert_eq!(q.in_flight(), 2);
        assert_eq!(q.pop_chain().len(), 2);
        assert_eq!(q.pop_chain().len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn dirty_tail_is_not_piggybacked() {
        let mut q = Q::new(None);
        q.enqueue(entry("WHO #c"));
        if let Some(h) = q.head_mut() {
            h.dirty = true;
        }
        assert_eq!(q.enqueue(entry("WHO #c")), Placement::Dispatch);
    }

    #[test]
    fn cap_holds_back_and_promotes_fifo() {
        let mut q = Q::new(Some(1));
        assert_eq!(q.enqueue(entry("ISON a")), Placement::Dispatch);
        assert_eq!(q.enqueue(entry("ISON b")), Placement::Wait);
        assert_eq!(q.enqueue(entry("ISON b")), Placement::Piggyback);
        assert_eq!(q.enqueue(entry("ISON c")), Placement::Wait);
        assert!(q.promote().is_empty());

        q.pop_chain();
        assert_eq!(q.promote(), vec!["ISON b".to_string()]);
        // b and its rider form the new head chain.
        assert_eq!(q.pop_chain().len(), 2);
        assert_eq!(q.promote(), vec!["ISON c".to_string()]);
    }

    #[test]
    fn chunks_respect_length_and_count() {
        let nicks: Vec<String> = (0..12).map(|i| format!("nick{i:02}")).collect();
        let by_count = chunk_words("USERHOST", &nicks, 510, 5);
        assert_eq!(by_count.iter().map(Vec::len).collect::<Vec<_>>(), vec![5, 5, 2]);
        let by_len = chunk_words("ISON", &nicks, 4 + 7 * 4, usize::MAX);
        assert!(by_len.iter().all(|c| c.len() <= 4));
        assert_eq!(by_len.concat(), nicks);
    }

    #[test]
    fn split_callback_ends_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: Callback<String> = Box::new(move |_, ev, _| {
            sink.lock().push(match ev {
                QueryEvent::Reply(r) => r.clone(),
                QueryEvent::End => "END".to_string(),
            })
        });
        let s = ServerRef { refnum: 0, generation: 1 };
        let mut ctl = Control::new();
        let mut parts = split_callback(cb, 2);
        parts[0](s, QueryEvent::Reply(&"a".to_string()), &mut ctl);
        parts[0](s, QueryEvent::End, &mut ctl);
        parts[1](s, QueryEvent::Reply(&"b".to_string()), &mut ctl);
        parts[1](s, QueryEvent::End, &mut ctl);
        assert_eq!(*seen.lock(), vec!["a", "b", "END"]);
    }

    #[test]
    fn end_is_delivered_once_per_entry() {
        let ends = Arc::new(Mutex::new(0));
        let mut q = Q::new(None);
        for _ in 0..3 {
            let ends = ends.clone();
            let cb: Callback<String> = Box::new(move |_, ev, _| {
                if matches!(ev, QueryEvent::End) {
                    *ends.lock() += 1;
                }
            });
            q.enqueue(Entry::new("WHO #c".into(), (), Some(cb)));
        }
        let s = ServerRef { refnum: 0, generation: 1 };
        let mut ctl = Control::new();
        let silent = finish_chain(q.pop_chain(), s, &mut ctl);
        assert_eq!(silent, 0);
        assert_eq!(*ends.lock(), 3);
    }
}
