//! L0 wire protocol: reserved command values and protocol-wide constants.

use std::fmt;

macro_rules! client_version {
    () => {
        "0.0.17"
    };
}

/// Client library version reported by the example driver.
pub const CLIENT_VERSION: &str = client_version!();

/// [`CLIENT_VERSION`] with a trailing NUL, for C callers.
pub const CLIENT_VERSION_NUL: &str = concat!(client_version!(), "\0");

/// Initial capacity of a connection's read buffer.
pub const L0_BUFFER_SIZE: usize = 4096;

/// Highest command value reserved for the protocol. Values above are application commands.
pub const CMD_L_END: u8 = 127;

/// First command value available to applications.
pub const APPLICATION_COMMAND_BASE: u8 = CMD_L_END + 1;

/// System commands understood by the L0 relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SystemCommand {
    /// Login (or key exchange) sent right after connect.
    Login = 0,
    Echo = 65,
    EchoAnswer = 66,
    /// Request the peer table of the addressed peer.
    Peers = 72,
    PeersAnswer = 73,
    Auth = 77,
    AuthAnswer = 78,
    /// Request the list of clients connected to the addressed relay.
    Clients = 79,
    ClientsAnswer = 80,
    SubscribeAnswer = 83,
    /// Answer of the authentication server after login.
    AuthLoginAnswer = 96,
    CryptoKey = 101,
}

impl SystemCommand {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Commands whose payload is never passed through the payload cipher.
    pub fn is_plaintext_only(cmd: u8) -> bool {
        cmd == SystemCommand::Login as u8 || cmd == SystemCommand::CryptoKey as u8
    }
}

impl TryFrom<u8> for SystemCommand {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Login),
            65 => Ok(Self::Echo),
            66 => Ok(Self::EchoAnswer),
            72 => Ok(Self::Peers),
            73 => Ok(Self::PeersAnswer),
            77 => Ok(Self::Auth),
            78 => Ok(Self::AuthAnswer),
            79 => Ok(Self::Clients),
            80 => Ok(Self::ClientsAnswer),
            83 => Ok(Self::SubscribeAnswer),
            96 => Ok(Self::AuthLoginAnswer),
            101 => Ok(Self::CryptoKey),
            other => Err(other),
        }
    }
}

impl From<SystemCommand> for u8 {
    fn from(cmd: SystemCommand) -> u8 {
        cmd as u8
    }
}

impl fmt::Display for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Login => "CMD_L_INIT",
            Self::Echo => "CMD_L_ECHO",
            Self::EchoAnswer => "CMD_L_ECHO_ANSWER",
            Self::Peers => "CMD_L_PEERS",
            Self::PeersAnswer => "CMD_L_PEERS_ANSWER",
            Self::Auth => "CMD_L_AUTH",
            Self::AuthAnswer => "CMD_L_AUTH_ANSWER",
            Self::Clients => "CMD_L_L0_CLIENTS",
            Self::ClientsAnswer => "CMD_L_L0_CLIENTS_ANSWER",
            Self::SubscribeAnswer => "CMD_L_SUBSCRIBE_ANSWER",
            Self::AuthLoginAnswer => "CMD_L_AUTH_LOGIN_ANSWER",
            Self::CryptoKey => "CMD_L_L0_CRYPTO_KEY",
        };
        f.write_str(name)
    }
}

/// True for command values reserved by the protocol (0..=127).
pub fn is_system_command(cmd: u8) -> bool {
    cmd <= CMD_L_END
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_version_is_nul_terminated_copy() {
        assert_eq!(CLIENT_VERSION_NUL.strip_suffix('\0'), Some(CLIENT_VERSION));
    }

    #[test]
    fn reserved_values_match_wire_table() {
        assert_eq!(SystemCommand::Login.code(), 0);
        assert_eq!(SystemCommand::EchoAnswer.code(), 66);
        assert_eq!(SystemCommand::PeersAnswer.code(), 73);
        assert_eq!(SystemCommand::ClientsAnswer.code(), 80);
        assert_eq!(SystemCommand::CryptoKey.code(), 101);
    }

    #[test]
    fn try_from_rejects_unknown() {
        assert_eq!(SystemCommand::try_from(72), Ok(SystemCommand::Peers));
        assert_eq!(SystemCommand::try_from(200), Err(200));
        assert_eq!(SystemCommand::try_from(1), Err(1));
    }

    #[test]
    fn system_range() {
        assert!(is_system_command(0));
        assert!(is_system_command(127));
        assert!(!is_system_command(128));
        assert_eq!(APPLICATION_COMMAND_BASE, 128);
    }
}
