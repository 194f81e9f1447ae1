//! SNTP (RFC 4330) client packets
//!
//! Only the unicast client exchange is needed: one 48-byte request, one reply,
//! transmit timestamp taken as the current time.

pub const PACKET_LEN: usize = 48;
pub const NTP_PORT: u16 = 123;

/// Seconds between 1900-01-01 and 1970-01-01
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const VERSION: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SntpError {
    #[error("reply shorter than {} bytes", PACKET_LEN)]
    Short,
    #[error("reply is not a server packet")]
    NotServer,
    #[error("kiss-o'-death from server")]
    KissOfDeath,
    #[error("server clock unsynchronized")]
    Unsynchronized,
}

/// Client request: version 4, mode 3, everything else zero
pub fn request() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = (VERSION << 3) | MODE_CLIENT;
    packet
}

/// Unix seconds from a server reply
pub fn parse_reply(reply: &[u8]) -> Result<u64, SntpError> {
    if reply.len() < PACKET_LEN {
        return Err(SntpError::Short);
    }
    let leap = reply[0] >> 6;
    let mode = reply[0] & 0x07;
    let stratum = reply[1];
    if mode != MODE_SERVER {
        return Err(SntpError::NotServer);
    }
    if stratum == 0 {
        return Err(SntpError::KissOfDeath);
    }
    if leap == 3 {
        return Err(SntpError::Unsynchronized);
    }
    let seconds = u32::from_be_bytes([reply[40], reply[41], reply[42], reply[43]]) as u64;
    // Era 1 starts in 2036
    let seconds = if seconds < NTP_UNIX_OFFSET {
        seconds + (1 << 32)
    } else {
        seconds
    };
    Ok(seconds - NTP_UNIX_OFFSET)
}
