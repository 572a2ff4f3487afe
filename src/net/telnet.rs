//! Inline telnet option negotiation and command capture.
//!
//! Negotiation requests are answered by rewriting the verb byte in place,
//! so the data sent back to the client carries our answers.

pub const IAC: u8 = 0xFF;
pub const DONT: u8 = 0xFE;
pub const DO: u8 = 0xFD;
pub const WONT: u8 = 0xFC;
pub const WILL: u8 = 0xFB;
pub const SB: u8 = 0xFA;
pub const SE: u8 = 0xF0;

pub const OPT_SUPPRESS_GO_AHEAD: u8 = 0x03;
pub const OPT_STATUS: u8 = 0x05;
pub const OPT_TERMINAL_TYPE: u8 = 0x18;
pub const OPT_WINDOW_SIZE: u8 = 0x1F;
pub const OPT_TERMINAL_SPEED: u8 = 0x20;
pub const OPT_REMOTE_FLOW_CONTROL: u8 = 0x21;
pub const OPT_LINEMODE: u8 = 0x22;
pub const OPT_AUTHENTICATION: u8 = 0x25;
pub const OPT_NEW_ENVIRON: u8 = 0x27;

pub const COMMAND_CAPACITY: usize = 80;

/// Answer to `verb` for `option`. Options we have no opinion on keep the
/// client's verb.
pub fn negotiate(verb: u8, option: u8) -> u8 {
    let offered = matches!(verb, WILL | WONT);
    match option {
        OPT_SUPPRESS_GO_AHEAD
        | OPT_STATUS
        | OPT_TERMINAL_TYPE
        | OPT_WINDOW_SIZE
        | OPT_TERMINAL_SPEED
        | OPT_REMOTE_FLOW_CONTROL
        | OPT_AUTHENTICATION
        | OPT_NEW_ENVIRON => {
            if offered {
                DONT
            } else {
                WONT
            }
        }
        OPT_LINEMODE => {
            if offered {
                DO
            } else {
                WILL
            }
        }
        _ => verb,
    }
}

/// Last command text received over telnet.
#[derive(Debug, Clone)]
pub struct TelnetState {
    command: [u8; COMMAND_CAPACITY],
    len: usize,
    pending: bool,
}

impl Default for TelnetState {
    fn default() -> Self {
        Self {
            command: [0; COMMAND_CAPACITY],
            len: 0,
            pending: false,
        }
    }
}

impl TelnetState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn command(&self) -> &[u8] {
        &self.command[..self.len]
    }

    /// Hands out the pending command once.
    pub fn take_command(&mut self) -> Option<String> {
        if !self.pending {
            return None;
        }
        self.pending = false;
        Some(String::from_utf8_lossy(self.command()).trim().to_string())
    }

    /// Answers every negotiation in `data` in place and captures the rest
    /// as command text.
    ///
    /// Sub-negotiations are passed through untouched, `IAC IAC` is a data
    /// byte that is not command text, and a sequence cut off by the end of
    /// `data` ends the scan. Line endings and NULs are not kept. At most
    /// `COMMAND_CAPACITY - 1` bytes are kept; the rest is dropped.
    pub fn process(&mut self, data: &mut [u8]) {
        let mut text = [0u8; COMMAND_CAPACITY];
        let mut text_len = 0;
        let mut i = 0;
        while i < data.len() {
            if data[i] != IAC {
                if !matches!(data[i], b'\r' | b'\n' | 0) && text_len < COMMAND_CAPACITY - 1 {
                    text[text_len] = data[i];
                    text_len += 1;
                }
                i += 1;
                continue;
            }
            let Some(&verb) = data.get(i + 1) else {
                break;
            };
            match verb {
                WILL | WONT | DO | DONT => {
                    let Some(&option) = data.get(i + 2) else {
                        break;
                    };
                    data[i + 1] = negotiate(verb, option);
                    i += 3;
                }
                SB => match find_subnegotiation_end(data, i + 2) {
                    Some(end) => i = end,
                    None => break,
                },
                _ => i += 2,
            }
        }

        if text_len > 0 {
            self.command = text;
            self.len = text_len;
            self.pending = true;
        }
    }
}

/// Index just past the `IAC SE` closing a sub-negotiation whose body
/// starts at `from`. An `IAC IAC` inside the body is an escaped data byte.
fn find_subnegotiation_end(data: &[u8], from: usize) -> Option<usize> {
    let mut j = from;
    while j + 1 < data.len() {
        if data[j] == IAC {
            match data[j + 1] {
                SE => return Some(j + 2),
                _ => j += 2,
            }
        } else {
            j += 1;
        }
    }
    None
}
