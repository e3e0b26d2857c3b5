//! Remote multicast setup package (application port 200).

use crate::crypto::{decrypt_block, encrypt_block};
use crate::{Aes128Key, DevAddr, LorawanError, Result};

pub const DEFAULT_F_PORT: u8 = 200;

const MC_GROUP_SETUP: u8 = 0x02;
const MC_GROUP_DELETE: u8 = 0x03;
const MC_CLASS_C_SESSION: u8 = 0x04;

fn key_block(prefix: u8, dev_addr: Option<DevAddr>) -> [u8; 16] {
    let mut b = [0u8; 16];
    b[0] = prefix;
    if let Some(addr) = dev_addr {
        b[1..5].copy_from_slice(&addr.to_le_bytes());
    }
    b
}

/// McRootKey for LoRaWAN 1.1 devices, derived from the AppKey.
pub fn mc_root_key_for_app_key(app_key: &Aes128Key) -> Aes128Key {
    Aes128Key(encrypt_block(app_key, key_block(0x20, None)))
}

/// McRootKey for LoRaWAN 1.0.x devices, derived from the GenAppKey.
pub fn mc_root_key_for_gen_app_key(gen_app_key: &Aes128Key) -> Aes128Key {
    Aes128Key(encrypt_block(gen_app_key, key_block(0x00, None)))
}

pub fn mc_ke_key(mc_root_key: &Aes128Key) -> Aes128Key {
    Aes128Key(encrypt_block(mc_root_key, key_block(0x00, None)))
}

pub fn mc_app_s_key(mc_key: &Aes128Key, mc_addr: DevAddr) -> Aes128Key {
    Aes128Key(encrypt_block(mc_key, key_block(0x01, Some(mc_addr))))
}

pub fn mc_nwk_s_key(mc_key: &Aes128Key, mc_addr: DevAddr) -> Aes128Key {
    Aes128Key(encrypt_block(mc_key, key_block(0x02, Some(mc_addr))))
}

/// McKey as transported in McGroupSetupReq. The device recovers the key with an
/// AES encrypt under McKEKey, so the server side applies the inverse.
pub fn encrypt_mc_key(mc_ke_key: &Aes128Key, mc_key: &Aes128Key) -> Aes128Key {
    Aes128Key(decrypt_block(mc_ke_key, mc_key.0))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McGroupSetupReq {
    pub mc_group_id: u8,
    pub mc_addr: DevAddr,
    pub mc_key_encrypted: Aes128Key,
    pub min_mc_f_cnt: u32,
    pub max_mc_f_cnt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McClassCSessionReq {
    pub mc_group_id: u8,
    /// GPS time in seconds at which the session starts.
    pub session_time: u32,
    /// Session duration exponent: the session lasts 2^timeout seconds.
    pub session_time_out: u8,
    /// Downlink frequency in Hz.
    pub dl_frequency: u32,
    pub dr: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    McGroupSetup(McGroupSetupReq),
    McGroupDelete { mc_group_id: u8 },
    McClassCSession(McClassCSessionReq),
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::McGroupSetup(_) => "McGroupSetupReq",
            Request::McGroupDelete { .. } => "McGroupDeleteReq",
            Request::McClassCSession(_) => "McClassCSessionReq",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(30);
        match self {
            Request::McGroupSetup(req) => {
                out.push(MC_GROUP_SETUP);
                out.push(req.mc_group_id & 0x03);
                out.extend_from_slice(&req.mc_addr.to_le_bytes());
                out.extend_from_slice(&req.mc_key_encrypted.0);
                out.extend_from_slice(&req.min_mc_f_cnt.to_le_bytes());
                out.extend_from_slice(&req.max_mc_f_cnt.to_le_bytes());
            }
            Request::McGroupDelete { mc_group_id } => {
                out.push(MC_GROUP_DELETE);
                out.push(mc_group_id & 0x03);
            }
            Request::McClassCSession(req) => {
                out.push(MC_CLASS_C_SESSION);
                out.push(req.mc_group_id & 0x03);
                out.extend_from_slice(&req.session_time.to_le_bytes());
                out.push(req.session_time_out & 0x0f);
                let freq = (req.dl_frequency / 100).to_le_bytes();
                out.extend_from_slice(&freq[..3]);
                out.push(req.dr);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    McGroupSetup {
        mc_group_id: u8,
        id_error: bool,
    },
    McGroupDelete {
        mc_group_id: u8,
        mc_group_undefined: bool,
    },
    McClassCSession {
        mc_group_id: u8,
        dr_error: bool,
        freq_error: bool,
        mc_group_undefined: bool,
        time_to_start: Option<u32>,
    },
}

impl Answer {
    pub fn name(&self) -> &'static str {
        match self {
            Answer::McGroupSetup { .. } => "McGroupSetupAns",
            Answer::McGroupDelete { .. } => "McGroupDeleteAns",
            Answer::McClassCSession { .. } => "McClassCSessionAns",
        }
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        let (&cid, payload) = b.split_first().ok_or(LorawanError::InvalidLength {
            expected: 1,
            actual: 0,
        })?;
        let status = *payload.first().ok_or(LorawanError::InvalidLength {
            expected: 2,
            actual: b.len(),
        })?;
        let mc_group_id = status & 0x03;

        match cid {
            MC_GROUP_SETUP => Ok(Answer::McGroupSetup {
                mc_group_id,
                id_error: status & 0x04 != 0,
            }),
            MC_GROUP_DELETE => Ok(Answer::McGroupDelete {
                mc_group_id,
                mc_group_undefined: status & 0x04 != 0,
            }),
            MC_CLASS_C_SESSION => {
                let dr_error = status & 0x04 != 0;
                let freq_error = status & 0x08 != 0;
                let mc_group_undefined = status & 0x10 != 0;
                let time_to_start = if dr_error || freq_error || mc_group_undefined {
                    None
                } else {
                    let t = payload.get(1..4).ok_or(LorawanError::InvalidLength {
                        expected: 5,
                        actual: b.len(),
                    })?;
                    Some(u32::from_le_bytes([t[0], t[1], t[2], 0]))
                };
                Ok(Answer::McClassCSession {
                    mc_group_id,
                    dr_error,
                    freq_error,
                    mc_group_undefined,
                    time_to_start,
                })
            }
            other => Err(LorawanError::UnknownCommand(other)),
        }
    }
}
