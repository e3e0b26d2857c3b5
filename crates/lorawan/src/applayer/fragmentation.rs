//! Fragmented data block transport package (application port 201).

use crate::{LorawanError, Result};

pub const DEFAULT_F_PORT: u8 = 201;

const FRAG_SESSION_STATUS: u8 = 0x01;
const FRAG_SESSION_SETUP: u8 = 0x02;
const FRAG_SESSION_DELETE: u8 = 0x03;
const DATA_FRAGMENT: u8 = 0x08;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragSessionSetupReq {
    pub frag_index: u8,
    pub mc_group_bit_mask: [bool; 4],
    pub nb_frag: u16,
    pub frag_size: u8,
    pub fragmentation_matrix: u8,
    pub block_ack_delay: u8,
    pub padding: u8,
    pub descriptor: [u8; 4],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    FragSessionStatus { frag_index: u8, participants: bool },
    FragSessionSetup(FragSessionSetupReq),
    FragSessionDelete { frag_index: u8 },
    DataFragment { frag_index: u8, n: u16, payload: Vec<u8> },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::FragSessionStatus { .. } => "FragSessionStatusReq",
            Request::FragSessionSetup(_) => "FragSessionSetupReq",
            Request::FragSessionDelete { .. } => "FragSessionDeleteReq",
            Request::DataFragment { .. } => "DataFragment",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Request::FragSessionStatus {
                frag_index,
                participants,
            } => vec![
                FRAG_SESSION_STATUS,
                u8::from(*participants) | ((frag_index & 0x03) << 1),
            ],
            Request::FragSessionSetup(req) => {
                let mask = req
                    .mc_group_bit_mask
                    .iter()
                    .enumerate()
                    .filter(|(_, set)| **set)
                    .fold(0u8, |acc, (i, _)| acc | (1 << i));
                let mut out = vec![FRAG_SESSION_SETUP, mask | ((req.frag_index & 0x03) << 4)];
                out.extend_from_slice(&req.nb_frag.to_le_bytes());
                out.push(req.frag_size);
                out.push((req.block_ack_delay & 0x07) | ((req.fragmentation_matrix & 0x07) << 3));
                out.push(req.padding);
                out.extend_from_slice(&req.descriptor);
                out
            }
            Request::FragSessionDelete { frag_index } => {
                vec![FRAG_SESSION_DELETE, frag_index & 0x03]
            }
            Request::DataFragment {
                frag_index,
                n,
                payload,
            } => {
                let index_and_n = (n & 0x3fff) | (u16::from(frag_index & 0x03) << 14);
                let mut out = Vec::with_capacity(3 + payload.len());
                out.push(DATA_FRAGMENT);
                out.extend_from_slice(&index_and_n.to_le_bytes());
                out.extend_from_slice(payload);
                out
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    FragSessionStatus {
        frag_index: u8,
        nb_frag_received: u16,
        missing_frag: u8,
        not_enough_matrix_memory: bool,
    },
    FragSessionSetup {
        frag_index: u8,
        encoding_unsupported: bool,
        not_enough_memory: bool,
        frag_session_index_not_supported: bool,
        wrong_descriptor: bool,
    },
    FragSessionDelete {
        frag_index: u8,
        session_does_not_exist: bool,
    },
}

impl Answer {
    pub fn name(&self) -> &'static str {
        match self {
            Answer::FragSessionStatus { .. } => "FragSessionStatusAns",
            Answer::FragSessionSetup { .. } => "FragSessionSetupAns",
            Answer::FragSessionDelete { .. } => "FragSessionDeleteAns",
        }
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        let need = |n: usize| LorawanError::InvalidLength {
            expected: n,
            actual: b.len(),
        };
        let (&cid, payload) = b.split_first().ok_or_else(|| need(1))?;

        match cid {
            FRAG_SESSION_STATUS => {
                let p = payload.get(..4).ok_or_else(|| need(5))?;
                let received_and_index = u16::from_le_bytes([p[0], p[1]]);
                Ok(Answer::FragSessionStatus {
                    frag_index: (received_and_index >> 14) as u8,
                    nb_frag_received: received_and_index & 0x3fff,
                    missing_frag: p[2],
                    not_enough_matrix_memory: p[3] & 0x01 != 0,
                })
            }
            FRAG_SESSION_SETUP => {
                let s = *payload.first().ok_or_else(|| need(2))?;
                Ok(Answer::FragSessionSetup {
                    frag_index: s >> 6,
                    encoding_unsupported: s & 0x01 != 0,
                    not_enough_memory: s & 0x02 != 0,
                    frag_session_index_not_supported: s & 0x04 != 0,
                    wrong_descriptor: s & 0x08 != 0,
                })
            }
            FRAG_SESSION_DELETE => {
                let s = *payload.first().ok_or_else(|| need(2))?;
                Ok(Answer::FragSessionDelete {
                    frag_index: s & 0x03,
                    session_does_not_exist: s & 0x04 != 0,
                })
            }
            other => Err(LorawanError::UnknownCommand(other)),
        }
    }
}

/// Padding needed to bring `len` to a multiple of `frag_size`.
pub fn padding(len: usize, frag_size: usize) -> usize {
    (frag_size - len % frag_size) % frag_size
}

/// Number of fragments for a payload of `len` bytes, padding included.
pub fn nb_frag(len: usize, frag_size: usize) -> usize {
    (len + padding(len, frag_size)) / frag_size
}

/// Splits `data` into `frag_size` rows and appends `redundancy` parity rows.
///
/// `data.len()` must be a multiple of `frag_size`.
pub fn encode(data: &[u8], frag_size: usize, redundancy: usize) -> Result<Vec<Vec<u8>>> {
    if frag_size == 0 {
        return Err(LorawanError::Fragmentation(
            "fragment size must be > 0".to_string(),
        ));
    }
    if data.len() % frag_size != 0 {
        return Err(LorawanError::Fragmentation(
            "length of data must be a multiple of the fragment size".to_string(),
        ));
    }

    let mut rows: Vec<Vec<u8>> = data.chunks(frag_size).map(<[u8]>::to_vec).collect();
    let w = rows.len();

    for y in 0..redundancy {
        let line = matrix_line(y + 1, w);
        let mut parity = vec![0u8; frag_size];
        for (x, row) in rows.iter().take(w).enumerate() {
            if line[x] {
                parity.iter_mut().zip(row).for_each(|(p, d)| *p ^= d);
            }
        }
        rows.push(parity);
    }

    Ok(rows)
}

fn prbs23(x: u32) -> u32 {
    let b0 = x & 1;
    let b1 = (x & 32) / 32;
    (x / 2) + ((b0 ^ b1) << 22)
}

/// Row `n` of the parity check matrix for `m` uncoded fragments.
fn matrix_line(n: usize, m: usize) -> Vec<bool> {
    let mut line = vec![false; m];
    if m == 0 {
        return line;
    }
    let mm = usize::from(m.is_power_of_two());
    let mut x = 1 + 1001 * n as u32;

    for _ in 0..m / 2 {
        let mut r = 1usize << 16;
        while r >= m {
            x = prbs23(x);
            r = x as usize % (m + mm);
        }
        line[r] = true;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_and_nb_frag() {
        assert_eq!(padding(100, 48), 44);
        assert_eq!(nb_frag(100, 48), 3);
        assert_eq!(padding(96, 48), 0);
        assert_eq!(nb_frag(96, 48), 2);
    }

    #[test]
    fn test_encode_without_redundancy_is_plain_split() {
        let data: Vec<u8> = (0..12).collect();
        let rows = encode(&data, 4, 0).unwrap();
        assert_eq!(rows, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9, 10, 11]]);
    }

    #[test]
    fn test_encode_rejects_unaligned_data() {
        assert!(encode(&[1, 2, 3], 2, 1).is_err());
        assert!(encode(&[1, 2], 0, 1).is_err());
    }

    #[test]
    fn test_encode_adds_parity_rows() {
        let data: Vec<u8> = (0..40).collect();
        let rows = encode(&data, 4, 5).unwrap();
        assert_eq!(rows.len(), 15);
        for row in &rows {
            assert_eq!(row.len(), 4);
        }
    }

    #[test]
    fn test_parity_row_is_xor_of_selected_rows() {
        let data: Vec<u8> = (0..40).collect();
        let rows = encode(&data, 4, 1).unwrap();
        let line = matrix_line(1, 10);
        let mut expected = vec![0u8; 4];
        for (x, sel) in line.iter().enumerate() {
            if *sel {
                for i in 0..4 {
                    expected[i] ^= rows[x][i];
                }
            }
        }
        assert_eq!(rows[10], expected);
    }

    #[test]
    fn test_matrix_line_selects_at_most_half() {
        for n in 1..20 {
            let line = matrix_line(n, 16);
            let selected = line.iter().filter(|b| **b).count();
            assert!(selected >= 1 && selected <= 8);
        }
    }

    #[test]
    fn test_data_fragment_layout() {
        let req = Request::DataFragment {
            frag_index: 1,
            n: 5,
            payload: vec![0xaa, 0xbb],
        };
        assert_eq!(req.to_bytes(), vec![0x08, 0x05, 0x40, 0xaa, 0xbb]);
    }

    #[test]
    fn test_frag_session_setup_layout() {
        let req = Request::FragSessionSetup(FragSessionSetupReq {
            frag_index: 0,
            mc_group_bit_mask: [true, false, false, false],
            nb_frag: 300,
            frag_size: 48,
            fragmentation_matrix: 0,
            block_ack_delay: 1,
            padding: 4,
            descriptor: [1, 2, 3, 4],
        });
        assert_eq!(
            req.to_bytes(),
            vec![0x02, 0x01, 0x2c, 0x01, 48, 0x01, 4, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_status_req_layout() {
        let req = Request::FragSessionStatus {
            frag_index: 2,
            participants: true,
        };
        assert_eq!(req.to_bytes(), vec![0x01, 0x05]);
    }

    #[test]
    fn test_parse_status_answer() {
        // 10 received, frag index 1, 3 missing, matrix memory ok
        let ans = Answer::from_bytes(&[0x01, 0x0a, 0x40, 0x03, 0x00]).unwrap();
        assert_eq!(
            ans,
            Answer::FragSessionStatus {
                frag_index: 1,
                nb_frag_received: 10,
                missing_frag: 3,
                not_enough_matrix_memory: false,
            }
        );
    }

    #[test]
    fn test_parse_setup_answer_error_bits() {
        let ans = Answer::from_bytes(&[0x02, 0x4a]).unwrap();
        assert_eq!(
            ans,
            Answer::FragSessionSetup {
                frag_index: 1,
                encoding_unsupported: false,
                not_enough_memory: true,
                frag_session_index_not_supported: false,
                wrong_descriptor: true,
            }
        );
    }

    #[test]
    fn test_parse_truncated_status_answer() {
        assert!(matches!(
            Answer::from_bytes(&[0x01, 0x00]),
            Err(LorawanError::InvalidLength { .. })
        ));
    }
}
