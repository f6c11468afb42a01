//! Client side of the upload-pack v0 negotiation.
//!
//! We send no capabilities, so the server answers without multi-ack:
//! - only wants: a single `NAK`, then the pack
//! - with a have: `ACK <id>` as soon as a have is common, or `NAK` for the
//!   flush and another `NAK` for `done` when none is
//!
//! `ACK <id> continue` lines from multi-ack servers are tolerated and do not
//! end the negotiation.

use crate::{GitError, PktLine, Result};

/// Negotiation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Consuming the ref advertisement up to its flush.
    List,
    /// Only wants were sent; waiting for `NAK`.
    WaitForNak,
    /// Haves were sent; waiting for a final `ACK` or the second `NAK`.
    AckContinue,
    /// The next byte on the stream is the pack.
    Ready,
}

/// Tracks the negotiation frame by frame.
#[derive(Debug, Clone)]
pub struct Negotiation {
    state: NegotiationState,
    with_have: bool,
    naks: u8,
}

impl Negotiation {
    /// Starts a negotiation; `with_have` is true if a `have` line was sent.
    pub fn new(with_have: bool) -> Self {
        Self {
            state: NegotiationState::List,
            with_have,
            naks: 0,
        }
    }

    /// Current phase.
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// True once the pack follows.
    pub fn is_ready(&self) -> bool {
        self.state == NegotiationState::Ready
    }

    /// Lines a client writes for `want` and optional `have`.
    pub fn request(want: &str, have: Option<&str>) -> Vec<PktLine> {
        let mut frames = vec![PktLine::line(&format!("want {}", want)), PktLine::Flush];
        if let Some(have) = have {
            frames.push(PktLine::line(&format!("have {}", have)));
            frames.push(PktLine::Flush);
        }
        frames.push(PktLine::line("done"));
        frames
    }

    /// Feeds one server frame and returns the new phase.
    pub fn advance(&mut self, pkt: &PktLine) -> Result<NegotiationState> {
        if let Some(err) = pkt.as_str().and_then(|l| l.strip_prefix("ERR ")) {
            return Err(GitError::Protocol(err.to_string()));
        }

        self.state = match self.state {
            NegotiationState::List => {
                if pkt.is_flush() {
                    if self.with_have {
                        NegotiationState::AckContinue
                    } else {
                        NegotiationState::WaitForNak
                    }
                } else {
                    NegotiationState::List
                }
            }
            NegotiationState::WaitForNak => match pkt.as_str() {
                Some("NAK") => NegotiationState::Ready,
                other => return Err(unexpected(other)),
            },
            NegotiationState::AckContinue => match pkt.as_str() {
                Some("NAK") => {
                    self.naks += 1;
                    if self.naks >= 2 {
                        NegotiationState::Ready
                    } else {
                        NegotiationState::AckContinue
                    }
                }
                Some(line) if line.starts_with("ACK ") => {
                    if line.ends_with(" continue") || line.ends_with(" common") {
                        NegotiationState::AckContinue
                    } else {
                        NegotiationState::Ready
                    }
                }
                other => return Err(unexpected(other)),
            },
            NegotiationState::Ready => {
                return Err(GitError::Protocol("frame after negotiation finished".into()))
            }
        };
        Ok(self.state)
    }
}

fn unexpected(line: Option<&str>) -> GitError {
    GitError::Protocol(format!("unexpected negotiation line {:?}", line.unwrap_or("<flush>")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OID: &str = "0123456789abcdef0123456789abcdef01234567";

    fn adv() -> Vec<PktLine> {
        vec![
            PktLine::line(&format!("{} HEAD\0multi_ack side-band-64k", OID)),
            PktLine::line(&format!("{} refs/heads/master", OID)),
            PktLine::Flush,
        ]
    }

    #[test]
    fn test_request_frames() {
        let bytes: Vec<u8> = Negotiation::request(OID, None)
            .iter()
            .flat_map(|p| p.encode().unwrap())
            .collect();
        assert_eq!(bytes, format!("0032want {}\n00000009done\n", OID).into_bytes());

        let with_have = Negotiation::request(OID, Some(OID));
        assert_eq!(with_have.len(), 5);
        assert_eq!(with_have[2].as_str(), Some(format!("have {}", OID).as_str()));
    }

    #[test]
    fn test_want_only_waits_for_nak() {
        let mut n = Negotiation::new(false);
        for pkt in adv() {
            n.advance(&pkt).unwrap();
        }
        assert_eq!(n.state(), NegotiationState::WaitForNak);
        assert_eq!(n.advance(&PktLine::line("NAK")).unwrap(), NegotiationState::Ready);
    }

    #[test]
    fn test_want_only_rejects_ack_before_nak() {
        let mut n = Negotiation::new(false);
        n.advance(&PktLine::Flush).unwrap();
        assert!(n.advance(&PktLine::line(&format!("ACK {}", OID))).is_err());
    }

    #[test]
    fn test_have_continues_until_final_ack() {
        let mut n = Negotiation::new(true);
        for pkt in adv() {
            n.advance(&pkt).unwrap();
        }
        assert_eq!(n.state(), NegotiationState::AckContinue);

        let cont = PktLine::line(&format!("ACK {} continue", OID));
        assert_eq!(n.advance(&cont).unwrap(), NegotiationState::AckContinue);
        let fin = PktLine::line(&format!("ACK {}", OID));
        assert_eq!(n.advance(&fin).unwrap(), NegotiationState::Ready);
        assert!(n.is_ready());
    }

    #[test]
    fn test_have_not_common_needs_two_naks() {
        let mut n = Negotiation::new(true);
        n.advance(&PktLine::Flush).unwrap();
        assert_eq!(n.advance(&PktLine::line("NAK")).unwrap(), NegotiationState::AckContinue);
        assert_eq!(n.advance(&PktLine::line("NAK")).unwrap(), NegotiationState::Ready);
    }

    #[test]
    fn test_server_error_line() {
        let mut n = Negotiation::new(false);
        let err = n.advance(&PktLine::line("ERR upload-pack: not our ref")).unwrap_err();
        assert!(err.to_string().contains("not our ref"));
    }

    #[test]
    fn test_no_frames_after_ready() {
        let mut n = Negotiation::new(false);
        n.advance(&PktLine::Flush).unwrap();
        n.advance(&PktLine::line("NAK")).unwrap();
        assert!(n.advance(&PktLine::line("NAK")).is_err());
    }
}
