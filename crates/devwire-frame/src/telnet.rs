//! Telnet (RFC 854) byte escaping.
//!
//! Application bytes equal to IAC are doubled on the way out. On the way in,
//! doubled IACs collapse back to one byte and every negotiation, command and
//! sub-negotiation sequence is stripped and reported as a [`TelnetEvent`].
//! The decoder is a state machine, so any sequence may be split across reads.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::wire::WireCodec;

/// Interpret As Command.
pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
/// Sub-negotiation begin.
pub const SB: u8 = 250;
pub const GA: u8 = 249;
pub const EL: u8 = 248;
pub const EC: u8 = 247;
pub const AYT: u8 = 246;
pub const AO: u8 = 245;
pub const IP: u8 = 244;
pub const BRK: u8 = 243;
pub const DM: u8 = 242;
pub const NOP: u8 = 241;
/// Sub-negotiation end.
pub const SE: u8 = 240;
pub const EOR: u8 = 239;

/// Sub-negotiation bytes kept per sequence; the rest is dropped.
const MAX_SUBNEGOTIATION_LEN: usize = 4 * 1024;
/// Undrained events kept; the oldest are dropped first.
const MAX_PENDING_EVENTS: usize = 256;

/// Telnet commands that may follow IAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetCommand {
    EndOfRecord = EOR,
    SubnegotiationEnd = SE,
    Nop = NOP,
    DataMark = DM,
    Break = BRK,
    InterruptProcess = IP,
    AbortOutput = AO,
    AreYouThere = AYT,
    EraseCharacter = EC,
    EraseLine = EL,
    GoAhead = GA,
    SubnegotiationBegin = SB,
    Will = WILL,
    Wont = WONT,
    Do = DO,
    Dont = DONT,
}

impl TelnetCommand {
    /// Parse a command byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            EOR => Self::EndOfRecord,
            SE => Self::SubnegotiationEnd,
            NOP => Self::Nop,
            DM => Self::DataMark,
            BRK => Self::Break,
            IP => Self::InterruptProcess,
            AO => Self::AbortOutput,
            AYT => Self::AreYouThere,
            EC => Self::EraseCharacter,
            EL => Self::EraseLine,
            GA => Self::GoAhead,
            SB => Self::SubnegotiationBegin,
            WILL => Self::Will,
            WONT => Self::Wont,
            DO => Self::Do,
            DONT => Self::Dont,
            _ => return None,
        })
    }

    /// The command's wire byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A control sequence removed from the application stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    /// `IAC WILL|WONT|DO|DONT <option>`.
    Negotiation { command: TelnetCommand, option: u8 },
    /// A two-byte command such as `IAC NOP` or `IAC GA`.
    Command(TelnetCommand),
    /// `IAC SB <option> ... IAC SE`.
    Subnegotiation { option: u8, data: Bytes },
    /// IAC followed by a byte that is not a Telnet command; both were dropped.
    Malformed(u8),
}

/// The reply that refuses a peer's option request, if one is owed.
///
/// `DO x` is answered with `WONT x` and `WILL x` with `DONT x`. Refusals and
/// other events need no answer.
pub fn refusal(event: &TelnetEvent) -> Option<[u8; 3]> {
    match event {
        TelnetEvent::Negotiation {
            command: TelnetCommand::Do,
            option,
        } => Some([IAC, WONT, *option]),
        TelnetEvent::Negotiation {
            command: TelnetCommand::Will,
            option,
        } => Some([IAC, DONT, *option]),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Data,
    Iac,
    Negotiate(TelnetCommand),
    SubnegotiateOption,
    Subnegotiate,
    SubnegotiateIac,
}

/// Escapes and unescapes the Telnet control protocol.
#[derive(Debug)]
pub struct TelnetCodec {
    state: DecoderState,
    sub_option: u8,
    sub_data: BytesMut,
    events: VecDeque<TelnetEvent>,
}

impl TelnetCodec {
    /// Create a codec in its initial state.
    pub fn new() -> Self {
        Self {
            state: DecoderState::Data,
            sub_option: 0,
            sub_data: BytesMut::new(),
            events: VecDeque::new(),
        }
    }

    /// Whether the decoder stopped in the middle of a control sequence.
    pub fn is_mid_sequence(&self) -> bool {
        self.state != DecoderState::Data
    }

    fn push_event(&mut self, event: TelnetEvent) {
        if self.events.len() == MAX_PENDING_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Handle the byte following an IAC in the data stream.
    fn after_iac(&mut self, byte: u8, dst: &mut BytesMut) -> DecoderState {
        match TelnetCommand::from_byte(byte) {
            _ if byte == IAC => {
                dst.put_u8(IAC);
                DecoderState::Data
            }
            Some(
                command @ (TelnetCommand::Will
                | TelnetCommand::Wont
                | TelnetCommand::Do
                | TelnetCommand::Dont),
            ) => DecoderState::Negotiate(command),
            Some(TelnetCommand::SubnegotiationBegin) => {
                self.sub_data.clear();
                DecoderState::SubnegotiateOption
            }
            Some(command) => {
                debug!(?command, "telnet command stripped");
                self.push_event(TelnetEvent::Command(command));
                DecoderState::Data
            }
            None => {
                warn!(byte, "malformed telnet sequence skipped");
                self.push_event(TelnetEvent::Malformed(byte));
                DecoderState::Data
            }
        }
    }
}

impl Default for TelnetCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCodec for TelnetCodec {
    fn encode(&mut self, src: &[u8], dst: &mut BytesMut) {
        dst.reserve(src.len());
        for &byte in src {
            if byte == IAC {
                dst.put_u8(IAC);
            }
            dst.put_u8(byte);
        }
    }

    fn decode(&mut self, src: &[u8], dst: &mut BytesMut) {
        dst.reserve(src.len());
        for &byte in src {
            let state = self.state;
            self.state = match state {
                DecoderState::Data if byte == IAC => DecoderState::Iac,
                DecoderState::Data => {
                    dst.put_u8(byte);
                    DecoderState::Data
                }
                DecoderState::Iac => self.after_iac(byte, dst),
                DecoderState::Negotiate(command) => {
                    debug!(?command, option = byte, "telnet negotiation stripped");
                    self.push_event(TelnetEvent::Negotiation {
                        command,
                        option: byte,
                    });
                    DecoderState::Data
                }
                DecoderState::SubnegotiateOption => {
                    self.sub_option = byte;
                    DecoderState::Subnegotiate
                }
                DecoderState::Subnegotiate if byte == IAC => DecoderState::SubnegotiateIac,
                DecoderState::Subnegotiate => {
                    if self.sub_data.len() < MAX_SUBNEGOTIATION_LEN {
                        self.sub_data.put_u8(byte);
                    }
                    DecoderState::Subnegotiate
                }
                DecoderState::SubnegotiateIac if byte == IAC => {
                    if self.sub_data.len() < MAX_SUBNEGOTIATION_LEN {
                        self.sub_data.put_u8(IAC);
                    }
                    DecoderState::Subnegotiate
                }
                DecoderState::SubnegotiateIac if byte == SE => {
                    let data = self.sub_data.split().freeze();
                    debug!(option = self.sub_option, len = data.len(), "telnet sub-negotiation stripped");
                    self.push_event(TelnetEvent::Subnegotiation {
                        option: self.sub_option,
                        data,
                    });
                    DecoderState::Data
                }
                DecoderState::SubnegotiateIac => {
                    // Unterminated sub-negotiation: drop it and treat this
                    // IAC as the start of a new sequence.
                    warn!(option = self.sub_option, byte, "unterminated telnet sub-negotiation");
                    self.sub_data.clear();
                    self.push_event(TelnetEvent::Malformed(SB));
                    self.after_iac(byte, dst)
                }
            };
        }
    }

    fn reset(&mut self) {
        self.state = DecoderState::Data;
        self.sub_option = 0;
        self.sub_data.clear();
        self.events.clear();
    }

    fn take_events(&mut self) -> Vec<TelnetEvent> {
        self.events.drain(..).collect()
    }
}
