//! OFS Datapath - OpenFlow 1.3 software switch core
//!
//! Flow tables, a multi-table match/action pipeline, group and meter tables,
//! a port abstraction and the controller-facing message surface.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            DATAPATH                                 │
//! │                                                                     │
//! │   PortSink ◄── ports ◄── dispatch ◄──────────────────┐              │
//! │                  │                                   │              │
//! │                  ▼                                   │              │
//! │   receive ──► Packet ──► ┌─────────┐   goto   ┌─────────┐           │
//! │                          │ table 0 │ ───────► │ table n │           │
//! │                          └────┬────┘          └────┬────┘           │
//! │                               │ meter / apply      │ action set     │
//! │                               ▼                    ▼                │
//! │                        ┌────────────┐      ┌─────────────┐          │
//! │                        │ MeterTable │      │ GroupTable  │          │
//! │                        └────────────┘      └─────────────┘          │
//! │                                                                     │
//! │   controller ──► handle(flow/group/meter/port-mod, packet-out)      │
//! │   controller ◄── events (packet-in, flow-removed, port-status)      │
//! │                     bounded channel, dropped and counted when full  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Concurrency
//!
//! | Component | Guard |
//! |-----------|-------|
//! | Flow table | `RwLock` per table, atomic entry counters |
//! | Groups, meters, ports | `DashMap` |
//! | Meter estimator | `Mutex` per meter |
//! | Switch config | `ArcSwap` |
//! | Flow aging | background sweeper thread |

#![warn(clippy::all)]

pub mod action;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod control;
pub mod datapath;
pub mod flow_table;
pub mod group;
pub mod matching;
pub mod meter;
pub mod packet;
pub mod pipeline;
pub mod port;
pub mod stats;

pub use action::{Action, ActionSet, Instruction};
pub use config::{ConfigError, DatapathConfig};
pub use control::{
    ControllerEvent, ControllerMessage, ErrorReport, FlowMod, GroupMod, MeterMod, PacketIn, PacketInReason, PacketOut, PortMod,
    SwitchConfig,
};
pub use datapath::{Datapath, DatapathError, FlowSweeper};
pub use flow_table::{FlowEntry, FlowFilter, FlowModFlags, FlowTable, TableConfig, TableMissPolicy};
pub use group::{Bucket, GroupTable, GroupType};
pub use matching::Match;
pub use meter::{MeterBand, MeterFlags, MeterOutcome, MeterTable};
pub use packet::{FrameBuilder, Packet};
pub use pipeline::{DropReason, PacketContext, Pipeline, PipelineResult};
pub use port::{PortSink, PortSpec, PortTable};
