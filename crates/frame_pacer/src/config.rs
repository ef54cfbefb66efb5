use std::time::Duration;

use crate::error::PacerError;
use crate::error::PacerReport;
use crate::error::PacerResult;
use crate::ring::RingLayout;

/// D3D12_CONSTANT_BUFFER_DATA_PLACEMENT_ALIGNMENT
pub const DEFAULT_CONSTANT_ALIGNMENT: usize = 256;
pub const DEFAULT_BACK_BUFFER_COUNT: usize = 2;

/// Settings for a [`crate::FramePacer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacerConfig {
    /// Number of slots in the ring, one per back buffer.
    pub back_buffer_count: usize,
    /// Required placement alignment of a constant-buffer view, in bytes.
    pub constant_alignment: usize,
    /// Padded constant records reserved per slot.
    pub draw_calls_per_frame: usize,
    /// How long a fence wait may block. `None` waits forever.
    pub wait_timeout: Option<Duration>,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            back_buffer_count: DEFAULT_BACK_BUFFER_COUNT,
            constant_alignment: DEFAULT_CONSTANT_ALIGNMENT,
            draw_calls_per_frame: 1,
            wait_timeout: None,
        }
    }
}

impl PacerConfig {
    pub fn with_back_buffer_count(mut self, count: usize) -> Self {
        self.back_buffer_count = count;
        self
    }

    pub fn with_constant_alignment(mut self, alignment: usize) -> Self {
        self.constant_alignment = alignment;
        self
    }

    pub fn with_draw_calls_per_frame(mut self, draws: usize) -> Self {
        self.draw_calls_per_frame = draws;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn validate(&self) -> PacerResult<()> {
        if self.back_buffer_count == 0 {
            return Err(PacerError::InvalidConfig("back_buffer_count must be at least 1".into()).into());
        }
        if self.draw_calls_per_frame == 0 {
            return Err(
                PacerError::InvalidConfig("draw_calls_per_frame must be at least 1".into()).into(),
            );
        }
        if !self.constant_alignment.is_power_of_two() {
            return Err(PacerError::InvalidConfig(format!(
                "constant_alignment must be a power of two, got {}",
                self.constant_alignment
            ))
            .into());
        }
        self.layout().map(|_| ())
    }

    /// Byte layout of the ring this config describes. Fails when the padded
    /// ring would not fit in the address space.
    pub fn layout(&self) -> PacerResult<RingLayout> {
        RingLayout::new(
            self.back_buffer_count,
            self.draw_calls_per_frame,
            self.constant_alignment,
        )
        .ok_or_else(|| {
            PacerReport::from(PacerError::InvalidConfig(format!(
                "{} slots of {} draws at alignment {} overflow the address space",
                self.back_buffer_count, self.draw_calls_per_frame, self.constant_alignment
            )))
        })
    }

    /// Builds a config from command line switches, starting from the defaults.
    ///
    /// Recognised: `-buffers=N`, `-align=N`, `-draws=N`, `-timeout-ms=N`.
    /// Both `-` and `/` prefixes are accepted and names are case-insensitive.
    /// Unknown arguments are ignored so callers can share the argument list.
    pub fn from_args<I, S>(args: I) -> PacerResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        for arg in args {
            let Some((name, value)) = split_switch(arg.as_ref()) else {
                continue;
            };
            match name.as_str() {
                "buffers" => config.back_buffer_count = parse_number(&name, value)?,
                "align" => config.constant_alignment = parse_number(&name, value)?,
                "draws" => config.draw_calls_per_frame = parse_number(&name, value)?,
                "timeout-ms" => {
                    let millis: u64 = parse_number(&name, value)?;
                    config.wait_timeout = Some(Duration::from_millis(millis));
                }
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }
}

/// Splits `-name=value` or `/name=value` into a lowercase name and the raw value.
pub fn split_switch(arg: &str) -> Option<(String, &str)> {
    let body = arg.strip_prefix('-').or_else(|| arg.strip_prefix('/'))?;
    let (name, value) = body.split_once('=')?;
    Some((name.to_ascii_lowercase(), value))
}

pub fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> PacerResult<T> {
    value.parse().map_err(|_| {
        PacerReport::from(PacerError::InvalidConfig(format!(
            "-{name} expects a number, got {value:?}"
        )))
    })
}
