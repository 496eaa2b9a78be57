//! Linux GPIO boot mode control
//!
//! This module provides `GpioControl`, a [`ControlReader`] backed by a single
//! input line requested through the GPIO character device (gpiocdev).
//!
//! The line is sampled repeatedly until it reads the same level for a number
//! of consecutive samples. With `active_low` set, a button pulling the line
//! to ground reads as [`ControlState::Active`].

use std::thread;
use std::time::Duration;

use crate::error::{LinuxGpioError, Result};

use gpiocdev::line::{Bias, Offset, Value};
use gpiocdev::request::{Config, Request};

use bankboot_core::control::{ControlReader, ControlState};

/// Default number of identical consecutive samples
const DEFAULT_DEBOUNCE_SAMPLES: u32 = 5;

/// Default delay between samples in microseconds
const DEFAULT_SAMPLE_INTERVAL_US: u64 = 2000;

/// Samples taken before giving up, as a multiple of the debounce count
const MAX_SAMPLE_FACTOR: u32 = 4;

/// Configuration for a GPIO boot mode control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioControlConfig {
    /// Device path (e.g., "/dev/gpiochip0")
    pub device: String,
    /// Control line offset
    pub line: Offset,
    /// Line reads active when low
    pub active_low: bool,
    /// Bias applied to the line, if any
    pub bias: Option<Bias>,
    /// Identical consecutive samples required
    pub debounce_samples: u32,
    /// Delay between samples in microseconds
    pub sample_interval_us: u64,
}

impl Default for GpioControlConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            line: 0,
            active_low: false,
            bias: None,
            debounce_samples: DEFAULT_DEBOUNCE_SAMPLES,
            sample_interval_us: DEFAULT_SAMPLE_INTERVAL_US,
        }
    }
}

impl GpioControlConfig {
    /// Create a new configuration for `line` on `device`
    pub fn new(device: impl Into<String>, line: Offset) -> Self {
        Self {
            device: device.into(),
            line,
            ..Default::default()
        }
    }

    /// Treat a low line as asserted
    pub fn with_active_low(mut self, active_low: bool) -> Self {
        self.active_low = active_low;
        self
    }

    /// Apply a bias to the line
    pub fn with_bias(mut self, bias: Bias) -> Self {
        self.bias = Some(bias);
        self
    }

    /// Set the debounce window
    pub fn with_debounce(mut self, samples: u32, interval_us: u64) -> Self {
        self.debounce_samples = samples.max(1);
        self.sample_interval_us = interval_us;
        self
    }
}

/// Boot mode control read from a GPIO line
pub struct GpioControl {
    config: GpioControlConfig,
    /// Line request, present once configured
    request: Option<Request>,
}

impl GpioControl {
    /// Create a control; the line is requested by `configure`
    pub fn new(config: GpioControlConfig) -> Self {
        Self {
            config,
            request: None,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &GpioControlConfig {
        &self.config
    }

    fn sample(request: &Request, line: Offset) -> Result<bool> {
        let value = request
            .value(line)
            .map_err(LinuxGpioError::GetValueFailed)?;
        Ok(value == Value::Active)
    }
}

impl ControlReader for GpioControl {
    type Error = LinuxGpioError;

    fn configure(&mut self) -> Result<()> {
        if self.request.is_some() {
            return Ok(());
        }
        if self.config.device.is_empty() {
            return Err(LinuxGpioError::NoDevice);
        }

        log::debug!(
            "linux_gpio: Requesting line {} on {}",
            self.config.line,
            self.config.device
        );

        let mut req_config = Config::default();
        req_config.with_line(self.config.line).as_input();
        if self.config.active_low {
            req_config.as_active_low();
        }
        if let Some(bias) = self.config.bias {
            req_config.with_bias(bias);
        }

        let request = Request::from_config(req_config)
            .on_chip(&self.config.device)
            .with_consumer("bankboot")
            .request()
            .map_err(|source| LinuxGpioError::LineRequestFailed {
                path: self.config.device.clone(),
                line: self.config.line,
                source,
            })?;

        log::info!(
            "linux_gpio: Boot mode control on {} line {}{}",
            self.config.device,
            self.config.line,
            if self.config.active_low {
                " (active low)"
            } else {
                ""
            }
        );
        self.request = Some(request);
        Ok(())
    }

    fn read(&mut self) -> Result<ControlState> {
        let request = self.request.as_ref().ok_or(LinuxGpioError::NotConfigured)?;
        let line = self.config.line;
        let interval = Duration::from_micros(self.config.sample_interval_us);

        debounce(
            self.config.debounce_samples,
            || Self::sample(request, line),
            || thread::sleep(interval),
        )
    }
}

/// Sample until `samples` consecutive reads agree
///
/// Gives up with [`LinuxGpioError::Unstable`] after `samples * 4` reads.
pub fn debounce<S, W>(samples: u32, mut sample: S, mut wait: W) -> Result<ControlState>
where
    S: FnMut() -> Result<bool>,
    W: FnMut(),
{
    let samples = samples.max(1);
    let limit = samples.saturating_mul(MAX_SAMPLE_FACTOR);
    let mut last = sample()?;
    let mut run = 1;

    for _ in 1..limit {
        if run >= samples {
            break;
        }
        wait();
        let level = sample()?;
        if level == last {
            run += 1;
        } else {
            log::trace!("linux_gpio: Bounce ({} -> {})", last, level);
            last = level;
            run = 1;
        }
    }

    if run < samples {
        return Err(LinuxGpioError::Unstable(limit));
    }
    Ok(if last {
        ControlState::Active
    } else {
        ControlState::Inactive
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        _ => Err(LinuxGpioError::InvalidParameter(format!(
            "{}={}",
            key, value
        ))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| LinuxGpioError::InvalidParameter(format!("{}={}", key, value)))
}

/// Parse control options from `key=value` pairs
///
/// Recognized keys: `dev`, `gpiochip`, `line`, `active_low`, `bias`
/// (`pull-up`, `pull-down`, `disabled`), `debounce` (sample count) and
/// `interval_us`.
pub fn parse_options(options: &[(&str, &str)]) -> Result<GpioControlConfig> {
    let mut config = GpioControlConfig::default();
    let mut have_line = false;
    let mut gpiochip: Option<u32> = None;

    for (key, value) in options {
        match *key {
            "dev" => {
                config.device = value.to_string();
            }
            "gpiochip" => {
                gpiochip = Some(parse_num(key, value)?);
            }
            "line" => {
                config.line = parse_num(key, value)?;
                have_line = true;
            }
            "active_low" => {
                config.active_low = parse_bool(key, value)?;
            }
            "bias" => {
                config.bias = Some(match *value {
                    "pull-up" => Bias::PullUp,
                    "pull-down" => Bias::PullDown,
                    "disabled" => Bias::Disabled,
                    _ => {
                        return Err(LinuxGpioError::InvalidParameter(format!(
                            "bias={}",
                            value
                        )))
                    }
                });
            }
            "debounce" => {
                config.debounce_samples = parse_num::<u32>(key, value)?.max(1);
            }
            "interval_us" => {
                config.sample_interval_us = parse_num(key, value)?;
            }
            _ => {
                log::warn!("linux_gpio: Unknown option: {}={}", key, value);
            }
        }
    }

    if config.device.is_empty() {
        match gpiochip {
            Some(n) => config.device = format!("/dev/gpiochip{}", n),
            None => return Err(LinuxGpioError::NoDevice),
        }
    } else if gpiochip.is_some() {
        return Err(LinuxGpioError::InvalidParameter(
            "only one of 'dev' or 'gpiochip' can be specified".to_string(),
        ));
    }

    if !have_line {
        return Err(LinuxGpioError::MissingParameter("line"));
    }

    Ok(config)
}
