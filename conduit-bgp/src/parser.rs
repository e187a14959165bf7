//! Streaming BGP-4 decoder: a [`conduit_core::deframer::DeframerHandler`]
//! driving HEADER -> BODY -> HEADER (§4.6, §8 invariant 7).
//!
//! This is the half of the codec interface that tolerates input arriving
//! split across arbitrary chunk boundaries; [`crate::codec::decode`] is
//! the simpler whole-buffer counterpart built on the same body parsers.
//!
//! A malformed header or an unrecognized message type synthesizes one
//! NOTIFICATION message (§9, "Open question — `error()` in HEADER") and
//! latches the decoder into its error state; callers observe this via
//! [`Parser::is_malformed`] and should follow up with a `StreamEnd` on
//! whatever pipeline is driving this parser.

use bytes::Bytes;
use conduit_core::buffer::Data;
use conduit_core::deframer::{DeframerCore, DeframerHandler};

use crate::codec;
use crate::config::HEADER_LEN;
use crate::error::BgpError;
use crate::message::{Message, MessageNotification};

const HEADER: i32 = 0;
const BODY: i32 = 1;
const ERROR: i32 = -1;

/// Streaming BGP-4 message decoder. One `Parser` per connection/stream;
/// state persists across calls to [`Parser::feed`] so a message split
/// across TCP segments decodes identically to one delivered whole.
pub struct Parser {
    core: DeframerCore,
    pending_type: u8,
    messages: Vec<Message>,
    malformed: bool,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    #[must_use]
    pub fn new() -> Self {
        let mut core = DeframerCore::new(HEADER);
        core.read_fixed(HEADER_LEN);
        Self {
            core,
            pending_type: 0,
            messages: Vec::new(),
            malformed: false,
        }
    }

    /// Feed more wire bytes in and drain whatever messages they complete.
    /// `input` is left holding whatever bytes weren't needed to complete
    /// the in-flight capture.
    pub fn feed(&mut self, input: &mut Data) -> Vec<Message> {
        // `self` is both the handler and the owner of `core`; swap it out
        // for the duration of the drive so `deframe` can borrow the
        // handler mutably without aliasing `self.core`.
        let mut core = std::mem::replace(&mut self.core, DeframerCore::new(HEADER));
        core.deframe(input, self);
        self.core = core;
        std::mem::take(&mut self.messages)
    }

    /// Whether the decoder has latched into its terminal error state.
    /// Once true, `feed` will not make further progress on this `Parser`.
    #[must_use]
    pub fn is_latched(&self) -> bool {
        self.core.is_error()
    }

    /// Whether a synthesized NOTIFICATION has been emitted (malformed
    /// header or unknown message type). Sticky once set.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        self.malformed
    }

    fn synthesize_notification(&mut self, err: &BgpError) {
        let (code, subcode) = err.notification_code();
        self.messages
            .push(Message::Notification(MessageNotification::new(code, subcode, Bytes::new())));
        self.malformed = true;
    }
}

impl DeframerHandler for Parser {
    const ERROR_STATE: i32 = ERROR;

    fn on_state(&mut self, core: &mut DeframerCore, state: i32, _last_byte: i32) -> i32 {
        match state {
            HEADER => {
                let header = core.take_fixed();
                let (type_code, total_len) = match codec::parse_header(&header) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        self.synthesize_notification(&err);
                        return ERROR;
                    }
                };
                if !(1..=4).contains(&type_code) {
                    self.synthesize_notification(&BgpError::UnknownMessageType(type_code));
                    return ERROR;
                }

                let body_len = total_len as usize - HEADER_LEN;
                if body_len == 0 {
                    match codec::decode_body(type_code, &[]) {
                        Ok(msg) => self.messages.push(msg),
                        Err(err) => {
                            self.synthesize_notification(&err);
                            return ERROR;
                        }
                    }
                    core.read_fixed(HEADER_LEN);
                    return HEADER;
                }

                // Explicit return with BODY scheduled — the reference
                // decoder's HEADER case fell through into BODY's switch
                // arm when it forgot this, re-running BODY's parse logic
                // immediately against stale data (§9, "Open question —
                // HEADER fallthrough"). There is no such fallthrough here.
                self.pending_type = type_code;
                core.read_into_data(body_len);
                BODY
            }
            BODY => {
                let body = core.take_data().to_vec();
                match codec::decode_body(self.pending_type, &body) {
                    Ok(msg) => self.messages.push(msg),
                    Err(err) => {
                        self.synthesize_notification(&err);
                        return ERROR;
                    }
                }
                core.read_fixed(HEADER_LEN);
                HEADER
            }
            _ => ERROR,
        }
    }
}
