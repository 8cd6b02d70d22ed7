//! The [`BandwidthControl`] that daemons hand to their control plane.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tor_error::ErrorReport as _;
use tracing::{info, warn};

use bw_ratelim::{
    AsyncClock, Clock, LimitedAsyncRead, LimitedAsyncWrite, LimitedReader, LimitedWriter, Limiter,
    SystemClock,
};

use crate::{BandwidthConfig, Persist, Result};

/// Which way data is flowing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[allow(clippy::exhaustive_enums)] // There are only two directions.
pub enum Direction {
    /// Data we receive, such as image pulls.
    Download,
    /// Data we send, such as image pushes.
    Upload,
}

impl Direction {
    /// Return the configuration file key that stores the limit for this direction.
    pub fn config_key(self) -> &'static str {
        match self {
            Direction::Download => "max-download-bandwidth",
            Direction::Upload => "max-upload-bandwidth",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}

/// The download and upload limiters of a daemon, and the means to change them.
pub struct BandwidthControl<C = SystemClock> {
    /// Limit shared by all downloads.
    download: Setting<C>,
    /// Limit shared by all uploads.
    upload: Setting<C>,
    /// Where persistent changes are recorded.
    persister: Box<dyn Persist>,
}

/// One direction's limiter, and the limit it was last given.
struct Setting<C> {
    /// The live limiter.
    limiter: Arc<Limiter<C>>,
    /// The configured limit, exactly as given; the limiter only holds an `f64`.
    ///
    /// Held while the limiter's rate is changed, so the two always agree.
    configured: Mutex<i64>,
}

impl<C: Clock> Setting<C> {
    /// Build a limiter for `value` bytes per second, using `clock`.
    fn new(value: i64, clock: C) -> Self {
        Setting {
            limiter: Limiter::with_clock(value as f64, clock),
            configured: Mutex::new(value),
        }
    }

    /// Return the configured limit, or 0 if unlimited.
    fn get(&self) -> i64 {
        std::cmp::max(*self.configured.lock().expect("poisoned lock"), 0)
    }

    /// Change the limit to `value`.
    fn set(&self, value: i64) {
        let mut configured = self.configured.lock().expect("poisoned lock");
        self.limiter.set_rate(value as f64);
        *configured = value;
    }
}

impl BandwidthControl<SystemClock> {
    /// Create the limiters described by `config`, recording persistent
    /// changes with `persister`.
    pub fn from_config(config: &BandwidthConfig, persister: Box<dyn Persist>) -> Self {
        Self::with_clock(config, persister, SystemClock::default())
    }
}

impl<C: Clock + Clone> BandwidthControl<C> {
    /// As [`from_config`](BandwidthControl::from_config), but using `clock`.
    pub fn with_clock(config: &BandwidthConfig, persister: Box<dyn Persist>, clock: C) -> Self {
        let setting = |direction| Setting::new(config.limit(direction), clock.clone());
        BandwidthControl {
            download: setting(Direction::Download),
            upload: setting(Direction::Upload),
            persister,
        }
    }
}

impl<C: Clock> BandwidthControl<C> {
    /// Return the setting for `direction`.
    fn setting(&self, direction: Direction) -> &Setting<C> {
        match direction {
            Direction::Download => &self.download,
            Direction::Upload => &self.upload,
        }
    }

    /// Return the limiter for `direction`.
    ///
    /// Change its rate with [`set_bandwidth`](BandwidthControl::set_bandwidth),
    /// not [`Limiter::set_rate`], or [`bandwidth`](BandwidthControl::bandwidth)
    /// will not notice.
    pub fn limiter(&self, direction: Direction) -> &Arc<Limiter<C>> {
        &self.setting(direction).limiter
    }

    /// Return the current limit for `direction`, in bytes per second.
    ///
    /// Returns 0 if that direction is unlimited.  The value is exactly the
    /// one last set, even where the limiter itself can only approximate it.
    pub fn bandwidth(&self, direction: Direction) -> i64 {
        self.setting(direction).get()
    }

    /// Set the limit for `direction` to `value` bytes per second.
    ///
    /// Zero or a negative value removes the limit.  The change takes effect
    /// immediately, including for streams that are already open.
    ///
    /// If `persistent` is true, the value is also recorded so that it
    /// survives a restart.  If that fails we return an error, but the new
    /// limit stays in effect regardless.
    pub fn set_bandwidth(&self, direction: Direction, value: i64, persistent: bool) -> Result<()> {
        info!(
            "Set max {} bandwidth to {}, persistent={}",
            direction, value, persistent
        );
        self.setting(direction).set(value);

        if persistent {
            if let Err(e) = self
                .persister
                .persist(direction.config_key(), Value::from(value))
            {
                warn!(
                    "Unable to persist max {} bandwidth: {}",
                    direction,
                    e.report()
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Wrap `reader` so that it counts against the download limit.
    pub fn limit_download<R>(&self, reader: R) -> LimitedReader<R, C> {
        self.download.limiter.limit_read(reader)
    }

    /// Wrap `writer` so that it counts against the upload limit.
    pub fn limit_upload<W>(&self, writer: W) -> LimitedWriter<W, C> {
        self.upload.limiter.limit_write(writer)
    }
}

impl<C: AsyncClock> BandwidthControl<C> {
    /// Wrap the async `reader` so that it counts against the download limit.
    pub fn limit_download_async<R>(&self, reader: R) -> LimitedAsyncRead<R, C> {
        self.download.limiter.limit_async_read(reader)
    }

    /// Wrap the async `writer` so that it counts against the upload limit.
    pub fn limit_upload_async<W>(&self, writer: W) -> LimitedAsyncWrite<W, C> {
        self.upload.limiter.limit_async_write(writer)
    }
}

impl<C: Clock> fmt::Debug for BandwidthControl<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BandwidthControl")
            .field("download", &self.download.get())
            .field("upload", &self.upload.get())
            .finish_non_exhaustive()
    }
}
