pub mod config;
pub mod container;
pub mod orchestrator;
pub mod procedures;
pub mod shutdown;
pub mod telemetry;

pub use config::{ConfigError, ConfigResult, DevRunConfig};
pub use container::{
    detect_runtime, run_to_completion, CliEngine, ContainerConfig, ContainerEngine,
    ContainerError, ContainerHandle, ContainerResult, ContainerRuntime, LogChunk, LogSource,
    LogStream, RunOutcome,
};
pub use orchestrator::{container_name, DevRunOptions, DevRunReport, Orchestrator};
pub use procedures::{add_numbers, Add2, GetRange, OnHello, CHANNEL_RANGE};
pub use shutdown::{stop_channel, stop_on_ctrl_c, StopHandle, StopSignal};
pub use telemetry::{
    sine_value, wall_clock_seconds, Channel, JoinedIds, PublisherConfig, Sample,
    TelemetryPublisher, ADD2_PROCEDURE, GET_RANGE_PROCEDURE, ONHELLO_TOPIC,
};
