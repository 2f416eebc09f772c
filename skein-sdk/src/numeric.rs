//! Numeric reply codes the core acts on.

pub const RPL_WELCOME: u16 = 1;
pub const RPL_YOURHOST: u16 = 2;
pub const RPL_MYINFO: u16 = 4;
pub const RPL_ISUPPORT: u16 = 5;
/// Server redirect: `<me> <host> <port> :<info>`.
pub const RPL_REDIR: u16 = 10;
pub const RPL_UMODEIS: u16 = 221;
pub const RPL_AWAY: u16 = 301;
pub const RPL_USERHOST: u16 = 302;
pub const RPL_ISON: u16 = 303;
pub const RPL_UNAWAY: u16 = 305;
pub const RPL_NOWAWAY: u16 = 306;
pub const RPL_ENDOFWHO: u16 = 315;
pub const RPL_NOTOPIC: u16 = 331;
pub const RPL_TOPIC: u16 = 332;
pub const RPL_WHOREPLY: u16 = 352;
pub const RPL_WHOSPCRPL: u16 = 354;
pub const RPL_NAMREPLY: u16 = 353;
pub const RPL_ENDOFNAMES: u16 = 366;
pub const RPL_ENDOFMOTD: u16 = 376;

pub const ERR_NOSUCHNICK: u16 = 401;
pub const ERR_NOSUCHSERVER: u16 = 402;
pub const ERR_NOSUCHCHANNEL: u16 = 403;
pub const ERR_TOOMANYCHANNELS: u16 = 405;
pub const ERR_NOMOTD: u16 = 422;
pub const ERR_NONICKNAMEGIVEN: u16 = 431;
pub const ERR_ERRONEUSNICKNAME: u16 = 432;
pub const ERR_NICKNAMEINUSE: u16 = 433;
pub const ERR_NICKCOLLISION: u16 = 436;
pub const ERR_UNAVAILRESOURCE: u16 = 437;
/// Nick change too fast (ircu/hybrid).
pub const ERR_NICKTOOFAST: u16 = 438;
pub const ERR_PASSWDMISMATCH: u16 = 464;
pub const ERR_YOUREBANNEDCREEP: u16 = 465;
pub const ERR_CHANNELISFULL: u16 = 471;
pub const ERR_INVITEONLYCHAN: u16 = 473;
pub const ERR_BANNEDFROMCHAN: u16 = 474;
pub const ERR_BADCHANNELKEY: u16 = 475;
pub const ERR_BADCHANMASK: u16 = 476;
pub const ERR_NEEDREGGEDNICK: u16 = 477;

/// Errors that mean a JOIN we sent did not succeed.
pub fn is_join_failure(n: u16) -> bool {
    matches!(
        n,
        ERR_NOSUCHCHANNEL
            | ERR_TOOMANYCHANNELS
            | ERR_CHANNELISFULL
            | ERR_INVITEONLYCHAN
            | ERR_BANNEDFROMCHAN
            | ERR_BADCHANNELKEY
            | ERR_BADCHANMASK
            | ERR_NEEDREGGEDNICK
    )
}

/// Errors rejecting a nickname we asked for.
pub fn is_nick_rejection(n: u16) -> bool {
    matches!(
        n,
        ERR_NONICKNAMEGIVEN
            | ERR_ERRONEUSNICKNAME
            | ERR_NICKNAMEINUSE
            | ERR_NICKCOLLISION
            | ERR_UNAVAILRESOURCE
            | ERR_NICKTOOFAST
    )
}
