use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::event::Event;
use crate::frontend::HookKind;
use crate::gate::ignore::IgnoreRule;
use crate::level::Levels;
use crate::nick::NickOrigin;
use crate::queue::who::{WhoReply, WhoRequest};
use crate::queue::{Callback, QueryEvent};
use crate::state::ConnState;
use crate::testing::{self, Seen, sent};

fn who_log(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Callback<WhoReply> {
    let log = log.clone();
    Box::new(move |_server, ev, _ctl| match ev {
        QueryEvent::Reply(r) => log.lock().push(format!("{tag}:{}", r.nick)),
        QueryEvent::End => log.lock().push(format!("{tag}:end")),
    })
}

#[test]
fn welcome_is_active_before_any_hook_runs() {
    let (mut c, rec) = testing::client();
    let mut spec = testing::spec("bob");
    spec.autojoin = vec!["#rust".into(), "#keyed sekrit".into()];
    spec.umodes = Some("+i".into());
    let s = c.add_server(spec);
    let mut rx = c.attach_test_link(s);
    sent(&mut rx);
    rec.clear();

    c.route(s, ":irc.test 001 bob :Welcome to the network");

    let seen = rec.seen();
    let active = seen
        .iter()
        .position(|e| matches!(e, Seen::Event(Event::StateChanged { to: ConnState::Active, .. })))
        .expect("went active");
    let hook = seen
        .iter()
        .position(|e| matches!(e, Seen::Hook { kind: HookKind::Numeric(1), .. }))
        .expect("001 hook offered");
    assert!(active < hook);
    assert_eq!(
        sent(&mut rx),
        vec!["MODE bob +i", "JOIN #rust", "JOIN #keyed sekrit"]
    );

    let conn = c.connection(s).expect("server");
    assert_eq!(conn.nick.as_deref(), Some("bob"));
    assert_eq!(conn.itsname.as_deref(), Some("irc.test"));
    assert!(conn.pending_nick.is_none());
    assert!(rec.events().contains(&Event::Registered {
        server: s,
        nick: "bob".into()
    }));
}

#[test]
fn privmsg_levels_follow_the_target() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    rec.clear();

    c.route(s, ":alice!a@h PRIVMSG #rust :hello all");
    c.route(s, ":alice!a@h PRIVMSG bob :hello you");

    let shown = rec.displays();
    assert_eq!(
        shown,
        vec![
            (Some("#rust".into()), Levels::PUBLIC, "<alice> hello all".into()),
            (Some("alice".into()), Levels::MSG, "*alice* hello you".into()),
        ]
    );
    assert_eq!(rec.hooks(), vec![HookKind::Public, HookKind::Msg]);
}

#[test]
fn chantypes_decide_what_is_public() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    c.route(s, ":irc.test 005 bob CHANTYPES=& :are supported by this server");
    rec.clear();

    c.route(s, ":alice!a@h PRIVMSG #notachannel :x");
    c.route(s, ":alice!a@h PRIVMSG &local :y");
    let levels: Vec<Levels> = rec.displays().into_iter().map(|(_, l, _)| l).collect();
    assert_eq!(levels, vec![Levels::MSG, Levels::PUBLIC]);
}

#[test]
fn claimed_hook_suppresses_display() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    rec.claim(HookKind::Public);
    rec.clear();
    c.route(s, ":alice!a@h PRIVMSG #rust :shh");
    assert!(rec.displays().is_empty());
    assert_eq!(rec.hooks(), vec![HookKind::Public]);
}

#[test]
fn away_notices_are_hooked_and_gated() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    rec.clear();
    c.route(s, ":alice!a@h AWAY :lunch");
    assert_eq!(rec.hooks(), vec![HookKind::Away]);
    assert_eq!(rec.texts(), vec!["alice is away: lunch"]);

    rec.claim(HookKind::Away);
    rec.clear();
    c.route(s, ":alice!a@h AWAY");
    assert_eq!(rec.hooks(), vec![HookKind::Away]);
    assert!(rec.displays().is_empty());

    c.ignores.add(IgnoreRule::new("carol!*@*", Levels::CRAP));
    rec.clear();
    c.route(s, ":carol!c@h AWAY :gone");
    assert!(rec.seen().is_empty());
}

#[test]
fn cap_lines_reach_the_hook() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    rec.clear();
    c.route(s, ":irc.test CAP bob NEW :away-notify");
    assert_eq!(rec.hooks(), vec![HookKind::Cap]);
    assert_eq!(rec.texts(), vec!["CAP bob NEW away-notify"]);
}

#[test]
fn ignored_sender_is_dropped_before_the_flood_ring() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    c.ignores.add(IgnoreRule::new("spammer!*@*", Levels::all()));
    rec.clear();

    for _ in 0..10 {
        c.route(s, ":spammer!s@bad.host PRIVMSG #rust :buy now");
    }
    assert!(rec.seen().is_empty());
    assert_eq!(c.connection(s).map(|c| c.flood.tracked()), Some(0));
}

#[test]
fn unclaimed_flood_alarm_rate_limits() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    rec.clear();

    for i in 0..6 {
        c.route(s, &format!(":noisy!n@h PRIVMSG #rust :line {i}"));
    }
    let hooks = rec.hooks();
    assert_eq!(hooks.iter().filter(|k| **k == HookKind::Flood).count(), 1);
    assert_eq!(rec.displays().len(), 2);
}

#[test]
fn claimed_flood_alarm_lets_the_message_through() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    rec.claim(HookKind::Flood);
    rec.clear();

    for i in 0..3 {
        c.route(s, &format!(":noisy!n@h PRIVMSG #rust :line {i}"));
    }
    assert_eq!(rec.displays().len(), 3);
}

#[test]
fn server_notices_bypass_the_gate() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    c.ignores.add(IgnoreRule::new("*", Levels::all()));
    rec.clear();
    c.route(s, ":irc.test NOTICE bob :*** Server restarting");
    assert_eq!(
        rec.displays(),
        vec![(None, Levels::SNOTE, "*** Server restarting".into())]
    );
}

#[test]
fn nick_in_use_during_registration_is_fudged() {
    let (mut c, _rec) = testing::client();
    let s = c.add_server(testing::spec("bob"));
    let mut rx = c.attach_test_link(s);
    sent(&mut rx);

    c.route(s, ":irc.test 433 * bob :Nickname is already in use");
    assert_eq!(sent(&mut rx), vec!["NICK bob_"]);
    let conn = c.connection(s).expect("server");
    assert_eq!(conn.nick_fudges, 1);
    assert_eq!(conn.pending_nick.as_ref().map(|p| p.nick.as_str()), Some("bob_"));

    c.route(s, ":irc.test 001 bob_ :Welcome");
    assert_eq!(c.connection(s).and_then(|c| c.nick.clone()).as_deref(), Some("bob_"));
}

#[test]
fn erroneous_nick_prompts_the_front_end() {
    let (mut c, rec) = testing::client();
    let s = c.add_server(testing::spec("b@d"));
    let mut rx = c.attach_test_link(s);
    sent(&mut rx);
    rec.answer_prompt(Some("good"));

    c.route(s, ":irc.test 432 * b@d :Erroneous nickname");
    assert!(rec.seen().contains(&Seen::Prompt("b@d".into())));
    assert_eq!(sent(&mut rx), vec!["NICK good"]);
}

#[test]
fn empty_prompt_waits_for_the_user() {
    let (mut c, rec) = testing::client();
    let s = c.add_server(testing::spec("b@d"));
    let mut rx = c.attach_test_link(s);
    sent(&mut rx);
    rec.answer_prompt(None);

    c.route(s, ":irc.test 432 * b@d :Erroneous nickname");
    assert!(sent(&mut rx).is_empty());
    let conn = c.connection(s).expect("server");
    assert!(conn.awaiting_nick);
    assert_eq!(conn.state, ConnState::Registering);

    c.change_nick(s, "fine").expect("nick");
    assert_eq!(sent(&mut rx), vec!["NICK fine"]);
}

#[test]
fn explicit_nick_is_never_fudged() {
    let (mut c, rec) = testing::client();
    let (s, mut rx) = testing::registered(&mut c, "bob");
    c.change_nick(s, "alice").expect("nick");
    assert_eq!(sent(&mut rx), vec!["NICK alice"]);
    assert_eq!(
        c.connection(s).and_then(|c| c.pending_nick.as_ref().map(|p| p.origin)),
        Some(NickOrigin::Explicit)
    );

    c.route(s, ":irc.test 433 bob alice :Nickname is already in use");
    assert!(sent(&mut rx).is_empty());
    let conn = c.connection(s).expect("server");
    assert!(conn.pending_nick.is_none());
    assert_eq!(conn.nick.as_deref(), Some("bob"));
    assert!(!rec.seen().iter().any(|e| matches!(e, Seen::Prompt(_))));
}

#[test]
fn own_nick_change_is_tracked() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    c.route(s, ":bob!u@h NICK robert");
    assert_eq!(c.connection(s).and_then(|c| c.nick.clone()).as_deref(), Some("robert"));
    assert!(rec.events().contains(&Event::NickChanged {
        server: s,
        old: Some("bob".into()),
        new: "robert".into()
    }));
}

#[test]
fn back_to_back_who_shares_one_line() {
    let (mut c, rec) = testing::client();
    let (s, mut rx) = testing::registered(&mut c, "bob");
    let log = Arc::new(Mutex::new(Vec::new()));
    c.who(s, WhoRequest::new("#rust"), Some(who_log(&log, "a"))).expect("who");
    c.who(s, WhoRequest::new("#rust"), Some(who_log(&log, "b"))).expect("who");
    assert_eq!(sent(&mut rx), vec!["WHO #rust"]);
    rec.clear();

    c.route(s, ":irc.test 352 bob #rust ~al host.example irc.test alice H :0 Alice");
    c.route(s, ":irc.test 315 bob #rust :End of /WHO list.");

    assert_eq!(*log.lock(), vec!["a:alice", "b:alice", "a:end", "b:end"]);
    assert!(rec.displays().is_empty());
    assert!(rec.hooks().is_empty());
    assert!(c.connection(s).is_some_and(|c| c.who.is_empty()));
}

#[test]
fn who_without_callback_displays_replies() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    c.who(s, WhoRequest::new("alice"), None).expect("who");
    rec.clear();

    c.route(s, ":irc.test 352 bob * ~al host.example irc.test alice H :0 Alice");
    c.route(s, ":irc.test 315 bob alice :End of /WHO list.");
    let texts = rec.texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("alice"));
    assert_eq!(texts[1], "End of WHO list for alice");
}

#[test]
fn ison_reply_is_consumed_by_the_queue() {
    let (mut c, rec) = testing::client();
    let (s, mut rx) = testing::registered(&mut c, "bob");
    c.ison(s, &["alice".into(), "carol".into()], None).expect("ison");
    assert_eq!(sent(&mut rx), vec!["ISON alice carol"]);
    rec.clear();

    c.route(s, ":irc.test 303 bob :alice");
    assert!(rec.hooks().is_empty());
    assert!(c.connection(s).is_some_and(|c| c.ison.is_empty()));
    assert!(rec.texts().iter().any(|t| t.contains("alice")));
}

#[test]
fn channel_membership_follows_join_part_kick() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    c.route(s, ":bob!u@h JOIN #rust");
    c.route(s, ":irc.test 353 bob = #rust :@bob alice +carol");
    c.route(s, ":alice!a@h PART #rust :later");
    {
        let conn = c.connection(s).expect("server");
        let ch = conn.channels.get("#rust").expect("joined");
        assert_eq!(ch.member_count(), 2);
    }
    c.route(s, ":carol!c@h KICK #rust bob :out");
    assert!(c.connection(s).is_some_and(|c| !c.channels.is_joined("#rust")));
    let events = rec.events();
    assert!(events.contains(&Event::Joined {
        server: s,
        channel: "#rust".into()
    }));
    assert!(events.contains(&Event::Parted {
        server: s,
        channel: "#rust".into()
    }));
}

#[test]
fn quit_is_shown_in_shared_channels() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    c.route(s, ":bob!u@h JOIN #a");
    c.route(s, ":bob!u@h JOIN #b");
    c.route(s, ":alice!a@h JOIN #a");
    c.route(s, ":alice!a@h JOIN #b");
    rec.clear();

    c.route(s, ":alice!a@h QUIT :gone");
    let targets: Vec<Option<String>> = rec.displays().into_iter().map(|(t, _, _)| t).collect();
    assert_eq!(targets, vec![Some("#a".into()), Some("#b".into())]);
}

#[test]
fn ping_is_answered() {
    let (mut c, _rec) = testing::client();
    let (s, mut rx) = testing::registered(&mut c, "bob");
    c.route(s, "PING :irc.test");
    assert_eq!(sent(&mut rx), vec!["PONG :irc.test"]);
}

#[test]
fn ctcp_version_gets_a_notice() {
    let (mut c, rec) = testing::client();
    let (s, mut rx) = testing::registered(&mut c, "bob");
    rec.clear();
    c.route(s, ":alice!a@h PRIVMSG bob :\x01VERSION\x01");
    let version = c.config().version_reply.clone();
    assert_eq!(sent(&mut rx), vec![format!("NOTICE alice :\x01VERSION {version}\x01")]);
    assert_eq!(rec.hooks(), vec![HookKind::Ctcp]);
}

#[test]
fn action_is_its_own_level() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    rec.clear();
    c.route(s, ":alice!a@h PRIVMSG #rust :\x01ACTION waves\x01");
    assert_eq!(
        rec.displays(),
        vec![(Some("#rust".into()), Levels::ACTION, "* alice waves".into())]
    );
}

#[test]
fn unknown_lines_are_odd_but_shown() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    rec.clear();

    c.route(s, ":irc.test FROB a b :c");
    c.route(s, ":alice!a@h PRIVMSG");
    c.route(s, ":irc.test");
    assert_eq!(
        rec.hooks(),
        vec![HookKind::OddServerStuff, HookKind::OddServerStuff, HookKind::OddServerStuff]
    );
    assert_eq!(
        rec.texts(),
        vec![":irc.test FROB a b :c", ":alice!a@h PRIVMSG", ":irc.test"]
    );
}

#[test]
fn unhandled_numerics_show_their_payload() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    rec.clear();
    c.route(s, ":irc.test 372 bob :- Message of the day");
    assert_eq!(rec.hooks(), vec![HookKind::Numeric(372)]);
    assert_eq!(rec.texts(), vec!["- Message of the day"]);
}

#[test]
fn hook_deleting_its_server_mid_line_is_safe() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    rec.on_hook(|server, kind, _args, ctl| {
        if kind == HookKind::Public {
            ctl.delete(server);
        }
        false
    });
    c.route(s, ":alice!a@h PRIVMSG #rust :bye");
    assert!(c.connection(s).is_none());
    assert!(rec.displays().iter().all(|(_, l, _)| *l != Levels::PUBLIC));
}

#[test]
fn join_failure_forgets_the_channel() {
    let (mut c, _rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    c.join(s, "#secret", None).expect("join");
    assert!(c.connection(s).is_some_and(|c| c.channels.get("#secret").is_some()));
    c.route(s, ":irc.test 473 bob #secret :Cannot join channel (+i)");
    assert!(c.connection(s).is_some_and(|c| c.channels.get("#secret").is_none()));
}

#[test]
fn redirect_adds_a_group_member() {
    let (mut c, rec) = testing::client();
    let (s, _rx) = testing::registered(&mut c, "bob");
    c.route(s, ":irc.test 010 bob other.test 7000 :Please use this server");

    let target = c.connection(s).and_then(|c| c.reconnects_to).expect("redirect");
    let other = c.connection(target).expect("new server");
    assert_eq!((other.spec.host.as_str(), other.spec.port), ("other.test", 7000));
    assert_eq!(other.spec.group, c.connection(s).and_then(|c| c.spec.group.clone()));
    assert!(rec.events().iter().any(|e| matches!(e, Event::Redirected { to, .. } if *to == target)));
}

#[test]
fn error_text_becomes_the_disconnect_reason() {
    let mut config = ClientConfig::default();
    config.reconnect.enabled = false;
    let (mut c, rec) = testing::client_with(config);
    let (s, _rx) = testing::registered(&mut c, "bob");
    c.route(s, "ERROR :Closing Link: bob (K-Lined)");
    c.fail(s, ConnState::Eof, "connection closed by server".into());
    assert!(rec.events().contains(&Event::Disconnected {
        server: s,
        reason: "Closing Link: bob (K-Lined)".into()
    }));
    assert_eq!(c.connection(s).map(|c| c.state), Some(ConnState::Closed));
}
