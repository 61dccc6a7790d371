//! Delta-encoding state shared by every cost line of a run.
//!
//! The consumer reconstructs absolute positions by applying each relative
//! line to the previous one, so the cursor lives for the whole output and is
//! never reset between symbols. Only header lines (absolute) re-anchor it.

use crate::domain::ConvertError;

/// How the line column of a continuation line is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinePosition {
    /// Relative to the previous line, always written with a sign
    Delta(i64),
    /// Line unknown: an absolute `0`
    Unknown,
}

/// Everything needed to write one continuation line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// New `fl=` context, if the file changed
    pub file: Option<String>,
    pub offset_delta: u64,
    pub line: LinePosition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Uninitialized,
    Active { file: String, line: u32, address: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingCursor {
    state: State,
}

impl Default for EncodingCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodingCursor {
    #[must_use]
    pub fn new() -> Self {
        Self { state: State::Uninitialized }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active { .. })
    }

    /// Current `(file, line, address)`, `None` before the first header line
    #[must_use]
    pub fn position(&self) -> Option<(&str, u32, u64)> {
        match &self.state {
            State::Uninitialized => None,
            State::Active { file, line, address } => Some((file.as_str(), *line, *address)),
        }
    }

    /// Re-anchor on an absolute header line
    ///
    /// An unknown file is written as an empty `fl=`, which becomes the
    /// current file; an unknown line is written (and stored) as `0`.
    pub fn anchor(&mut self, file: Option<&str>, line: Option<u32>, address: u64) {
        self.state = State::Active {
            file: file.unwrap_or_default().to_string(),
            line: line.unwrap_or(0),
            address,
        };
    }

    /// Move to the next cost-bearing address of the current symbol
    ///
    /// # Errors
    /// `Consistency` if no header line was written yet or `address` does not
    /// lie strictly after the cursor.
    pub fn advance(
        &mut self,
        file: Option<&str>,
        line: Option<u32>,
        address: u64,
    ) -> Result<Step, ConvertError> {
        let State::Active { file: cur_file, line: cur_line, address: cur_address } =
            &mut self.state
        else {
            return Err(ConvertError::Consistency(format!(
                "continuation line at {address:#x} before any header line"
            )));
        };
        if address <= *cur_address {
            return Err(ConvertError::Consistency(format!(
                "cost line at {address:#x} does not follow {cur_address:#x}"
            )));
        }
        let offset_delta = address - *cur_address;
        *cur_address = address;

        let file = match file {
            Some(file) if file != cur_file.as_str() => {
                file.clone_into(cur_file);
                Some(file.to_string())
            }
            _ => None,
        };

        let line = match line {
            Some(line) => {
                let delta = i64::from(line) - i64::from(*cur_line);
                *cur_line = line;
                LinePosition::Delta(delta)
            }
            None => {
                *cur_line = 0;
                LinePosition::Unknown
            }
        };

        Ok(Step { file, offset_delta, line })
    }
}
