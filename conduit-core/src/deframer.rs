//! Generic driver for byte-oriented protocol decoders (§4.5).
//!
//! A decoder owns an integer-tagged state machine; at each transition it
//! asks the driver to capture the next `n` bytes (into a small fixed
//! buffer, or into a [`Data`] it will keep zero-copy), or to pass bytes
//! through verbatim. The driver persists partially-filled captures across
//! calls to [`DeframerCore::deframe`], so feeding a wire sequence split
//! across arbitrary chunk boundaries is indistinguishable from feeding it
//! whole (§8 invariant 7, decoder resumability).

use crate::buffer::Data;

/// Implemented by a concrete protocol decoder (e.g. the BGP `Parser`).
///
/// `on_state` is called either once per input byte (when no capture is
/// scheduled) or once per completed capture, always with the last byte of
/// whatever was just consumed — mirroring the reference decoder's uniform
/// `on_state(state, c)` signature. Implementations retrieve a completed
/// capture's bytes via [`DeframerCore::take_fixed`] / `take_data` at the
/// top of the branch that just received them.
pub trait DeframerHandler {
    /// The state value that latches the decoder into a terminal error.
    /// Decoders must use this exact value to signal failure; any other
    /// value is treated as a live state to keep driving.
    const ERROR_STATE: i32;

    fn on_state(&mut self, core: &mut DeframerCore, state: i32, last_byte: i32) -> i32;

    /// Called repeatedly with available bytes while pass-through mode is
    /// active (`core.pass_all(true)`). Default: drop the bytes.
    fn on_pass(&mut self, _core: &mut DeframerCore, _data: Data) {}
}

enum Capture {
    None,
    Fixed { need: usize, buf: Vec<u8> },
    IntoData { need: usize, data: Data },
}

enum Completed {
    None,
    Fixed(Vec<u8>),
    Data(Data),
}

/// Driver state shared with the decoder via `&mut` during `on_state`.
pub struct DeframerCore {
    state: i32,
    error: bool,
    pass_all: bool,
    capture: Capture,
    completed: Completed,
}

impl DeframerCore {
    #[must_use]
    pub fn new(initial_state: i32) -> Self {
        Self {
            state: initial_state,
            error: false,
            pass_all: false,
            capture: Capture::None,
            completed: Completed::None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> i32 {
        self.state
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error
    }

    /// Reset to a fresh decode, discarding any in-flight capture.
    pub fn reset(&mut self, initial_state: i32) {
        self.state = initial_state;
        self.error = false;
        self.pass_all = false;
        self.capture = Capture::None;
        self.completed = Completed::None;
    }

    /// Schedule a capture of exactly `n` bytes into a small owned buffer.
    /// Retrieve it in a later `on_state` call via [`Self::take_fixed`].
    pub fn read_fixed(&mut self, n: usize) {
        self.capture = Capture::Fixed {
            need: n,
            buf: Vec::with_capacity(n),
        };
    }

    /// Schedule a capture of exactly `n` bytes into a `Data`, zero-copy
    /// from the input stream. Retrieve it via [`Self::take_data`].
    pub fn read_into_data(&mut self, n: usize) {
        self.capture = Capture::IntoData {
            need: n,
            data: Data::new(),
        };
    }

    /// Enter or leave pass-through mode.
    pub fn pass_all(&mut self, yes: bool) {
        self.pass_all = yes;
    }

    /// Take the most recently completed fixed-size capture.
    ///
    /// # Panics
    ///
    /// Panics if called when no fixed capture just completed; this
    /// indicates the decoder mismatched its own state machine.
    #[must_use]
    pub fn take_fixed(&mut self) -> Vec<u8> {
        match std::mem::replace(&mut self.completed, Completed::None) {
            Completed::Fixed(buf) => buf,
            _ => panic!("take_fixed called without a completed fixed capture"),
        }
    }

    /// Take the most recently completed `Data` capture.
    ///
    /// # Panics
    ///
    /// Panics if called when no data capture just completed.
    #[must_use]
    pub fn take_data(&mut self) -> Data {
        match std::mem::replace(&mut self.completed, Completed::None) {
            Completed::Data(data) => data,
            _ => panic!("take_data called without a completed data capture"),
        }
    }

    /// Drive the state machine over `input`, consuming as many bytes as
    /// are available. Partial captures are preserved in `self` for the
    /// next call.
    pub fn deframe<H: DeframerHandler>(&mut self, input: &mut Data, handler: &mut H) {
        loop {
            if self.error {
                break;
            }

            if self.pass_all {
                if input.empty() {
                    break;
                }
                let chunk = input.shift(input.size());
                handler.on_pass(self, chunk);
                continue;
            }

            match std::mem::replace(&mut self.capture, Capture::None) {
                Capture::None => {
                    if input.empty() {
                        break;
                    }
                    let byte = input.shift(1).to_vec()[0];
                    let next = handler.on_state(self, self.state, i32::from(byte));
                    self.state = next;
                    if next == H::ERROR_STATE {
                        self.error = true;
                    }
                }
                Capture::Fixed { need, mut buf } => {
                    if input.empty() {
                        self.capture = Capture::Fixed { need, buf };
                        break;
                    }
                    let take = (need - buf.len()).min(input.size());
                    let chunk = input.shift(take);
                    buf.extend_from_slice(&chunk.to_vec());
                    if buf.len() == need {
                        let last_byte = i32::from(*buf.last().unwrap_or(&0));
                        self.completed = Completed::Fixed(buf);
                        let next = handler.on_state(self, self.state, last_byte);
                        self.state = next;
                        if next == H::ERROR_STATE {
                            self.error = true;
                        }
                    } else {
                        self.capture = Capture::Fixed { need, buf };
                        break;
                    }
                }
                Capture::IntoData { need, mut data } => {
                    if input.empty() {
                        self.capture = Capture::IntoData { need, data };
                        break;
                    }
                    let take = (need - data.size()).min(input.size());
                    let moved = input.shift(take);
                    data.push(moved);
                    if data.size() == need {
                        let last_byte = if need == 0 {
                            0
                        } else {
                            *data.to_vec().last().unwrap_or(&0) as i32
                        };
                        self.completed = Completed::Data(data);
                        let next = handler.on_state(self, self.state, last_byte);
                        self.state = next;
                        if next == H::ERROR_STATE {
                            self.error = true;
                        }
                    } else {
                        self.capture = Capture::IntoData { need, data };
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A trivial decoder over `len(1) | payload(len)` frames, used to
    /// exercise resumability under arbitrary chunk splits.
    struct LenPrefixed {
        frames: Vec<Vec<u8>>,
    }

    const START: i32 = 0;
    const BODY: i32 = 1;
    const ERROR: i32 = -1;

    impl DeframerHandler for LenPrefixed {
        const ERROR_STATE: i32 = ERROR;

        fn on_state(&mut self, core: &mut DeframerCore, state: i32, last_byte: i32) -> i32 {
            match state {
                START => {
                    core.read_into_data(last_byte as usize);
                    BODY
                }
                BODY => {
                    let data = core.take_data();
                    self.frames.push(data.to_vec());
                    core.read_fixed(1);
                    START
                }
                _ => ERROR,
            }
        }
    }

    fn drive(splits: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut decoder = LenPrefixed { frames: Vec::new() };
        let mut core = DeframerCore::new(START);
        core.read_fixed(1);
        for chunk in splits {
            let mut input = Data::from(*chunk);
            core.deframe(&mut input, &mut decoder);
        }
        decoder.frames
    }

    #[test]
    fn resumable_across_arbitrary_splits() {
        let whole = drive(&[b"\x03abc\x02de"]);
        assert_eq!(whole, vec![b"abc".to_vec(), b"de".to_vec()]);

        let split = drive(&[b"\x03ab", b"c\x02d", b"e"]);
        assert_eq!(split, whole);

        let byte_at_a_time: Vec<&[u8]> = b"\x03abc\x02de".iter().map(std::slice::from_ref).collect();
        let trickled = drive(&byte_at_a_time);
        assert_eq!(trickled, whole);
    }

    #[test]
    fn error_state_latches() {
        struct AlwaysErrors;
        impl DeframerHandler for AlwaysErrors {
            const ERROR_STATE: i32 = -1;
            fn on_state(&mut self, _core: &mut DeframerCore, _state: i32, _last_byte: i32) -> i32 {
                -1
            }
        }
        let mut handler = AlwaysErrors;
        let mut core = DeframerCore::new(0);
        let mut input = Data::from(&b"xy"[..]);
        core.deframe(&mut input, &mut handler);
        assert!(core.is_error());
        assert_eq!(input.size(), 1, "only one byte should have been consumed before latching");
    }
}
