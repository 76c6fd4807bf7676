//! Synthetic sine-wave telemetry published over WAMP.
//!
//! On join the publisher subscribes a logging handler to
//! `com.example.onhello`, registers `com.example.add2` and
//! `cathode.get_range`, then publishes one `[timestamp, value]` sample per
//! channel to `realtime.data_A`, `realtime.data_B` and `realtime.data_C`
//! every publish interval until its stop signal fires.
//!
//! ```rust,no_run
//! use harness::shutdown::stop_on_ctrl_c;
//! use harness::telemetry::{PublisherConfig, TelemetryPublisher};
//! use wamp::{Session, WampClient, WampConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = WampClient::connect(&WampConfig::default()).await?;
//! let publisher = TelemetryPublisher::new(&client, PublisherConfig::default());
//! publisher.on_join().await?;
//!
//! let mut stop = stop_on_ctrl_c();
//! publisher.run(&mut stop).await?;
//! client.leave().await?;
//! # Ok(())
//! # }
//! ```

use crate::procedures::{Add2, GetRange, OnHello};
use crate::shutdown::StopSignal;
use chrono::Utc;
use serde_json::{json, Value};
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use wamp::{Id, Session, WampResult};

pub const ONHELLO_TOPIC: &str = "com.example.onhello";
pub const ADD2_PROCEDURE: &str = "com.example.add2";
pub const GET_RANGE_PROCEDURE: &str = "cathode.get_range";

/// One of the three synthetic channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    A,
    B,
    C,
}

impl Channel {
    /// Publish order within one iteration.
    pub const ALL: [Channel; 3] = [Channel::A, Channel::B, Channel::C];

    pub fn topic(&self) -> &'static str {
        match self {
            Channel::A => "realtime.data_A",
            Channel::B => "realtime.data_B",
            Channel::C => "realtime.data_C",
        }
    }

    /// Period divisor: the wave is `sin(t / divisor * PI)`.
    pub fn divisor(&self) -> f64 {
        match self {
            Channel::A => 10.0,
            Channel::B => 20.0,
            Channel::C => 25.0,
        }
    }
}

pub fn sine_value(timestamp: f64, divisor: f64) -> f64 {
    (timestamp / divisor * PI).sin()
}

/// Seconds since the Unix epoch with microsecond resolution.
pub fn wall_clock_seconds() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub channel: Channel,
    pub timestamp: f64,
    pub value: f64,
}

impl Sample {
    pub fn at(channel: Channel, timestamp: f64) -> Self {
        Self {
            channel,
            timestamp,
            value: sine_value(timestamp, channel.divisor()),
        }
    }

    /// Wire payload `[timestamp, value]`.
    pub fn payload(&self) -> Vec<Value> {
        vec![json!(self.timestamp), json!(self.value)]
    }
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub publish_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            publish_interval: Duration::from_millis(200),
        }
    }
}

impl PublisherConfig {
    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.publish_interval.is_zero() {
            return Err("Publish interval must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Ids handed out by the router during `on_join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinedIds {
    pub onhello_subscription: Id,
    pub add2_registration: Id,
    pub get_range_registration: Id,
}

pub struct TelemetryPublisher<'s, S: Session + ?Sized> {
    session: &'s S,
    config: PublisherConfig,
}

impl<'s, S: Session + ?Sized> TelemetryPublisher<'s, S> {
    pub fn new(session: &'s S, config: PublisherConfig) -> Self {
        Self { session, config }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Subscribe and register, in that order. Any failure ends the session.
    pub async fn on_join(&self) -> WampResult<JoinedIds> {
        let onhello_subscription = self
            .session
            .subscribe(ONHELLO_TOPIC, Arc::new(OnHello))
            .await?;
        info!("subscribed to topic 'onhello'");

        let add2_registration = self
            .session
            .register(ADD2_PROCEDURE, Arc::new(Add2::new()))
            .await?;
        info!("procedure add2() registered");

        let get_range_registration = self
            .session
            .register(GET_RANGE_PROCEDURE, Arc::new(GetRange::new()))
            .await?;
        info!("procedure get_range() registered");

        Ok(JoinedIds {
            onhello_subscription,
            add2_registration,
            get_range_registration,
        })
    }

    /// Publish one sample per channel, A then B then C, each awaited.
    pub async fn publish_tick(&self, timestamp: f64) -> WampResult<[Sample; 3]> {
        let samples = Channel::ALL.map(|channel| Sample::at(channel, timestamp));
        debug!("publishing {}", timestamp);

        for sample in &samples {
            self.session
                .publish(sample.channel.topic(), sample.payload())
                .await?;
        }
        Ok(samples)
    }

    /// Publish until `stop` fires; returns the number of completed iterations.
    pub async fn run(&self, stop: &mut StopSignal) -> WampResult<u64> {
        let mut iterations = 0u64;

        while !stop.is_stopped() {
            self.publish_tick(wall_clock_seconds()).await?;
            iterations += 1;

            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = tokio::time::sleep(self.config.publish_interval) => {}
            }
        }

        info!("Publisher stopped after {} iterations", iterations);
        Ok(iterations)
    }
}
