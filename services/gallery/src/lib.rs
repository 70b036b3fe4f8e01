//! Gallery Processing Service
//!
//! Processing pipeline behind the photo gallery. New uploads land in a
//! staging bucket; a worker watermarks each one with its owner's display
//! name, publishes it under the primary bucket's `active/` prefix and records
//! it in PostgreSQL. Failed attempts are re-dispatched through Kafka with a
//! bounded attempt counter. Published photos can be moved to and from the
//! `recycle/` prefix, or purged for good.
//!
//! ## Features
//!
//! - **Watermarking**: label drawn in the bottom-right corner, sized to the
//!   image width, re-encoded in the upload's own format
//! - **Bounded Retries**: `retryAttempt` travels with the event; the owner is
//!   notified once and the staging copy is removed when the budget runs out
//! - **Recycle Bin**: copy, delete, update state machine with explicit
//!   conflict reporting when a move stops part way
//! - **Health Toggle**: externally controlled health flag for failover drills
//!
//! ## Architecture
//!
//! ```text
//!  Upload                 S3 staging              S3 primary
//! ┌──────────────┐       ┌──────────────┐        ┌──────────────┐
//! │ Upload       │──────▶│ {uuid}       │        │ active/      │
//! │ Service      │       └──────────────┘        │ recycle/     │
//! └──────────────┘              │                └──────────────┘
//!        │                      ▼                   ▲        ▲
//!        │               ┌──────────────┐           │        │
//!        └──────────────▶│ Retry        │──────────▶│        │
//!                        │ Coordinator  │  Image    │  ┌──────────────┐
//!  Kafka                 └──────────────┘  Worker   │  │ Recycle      │
//! ┌──────────────┐          │      │                │  │ Bin          │
//! │ processing   │◀─────────┘      │                │  └──────────────┘
//! │ events       │─────────▶ (consumer)             │        │
//! ├──────────────┤                 │                ▼        ▼
//! │ notifications│◀────────────────┘          ┌──────────────────┐
//! └──────────────┘                            │ PostgreSQL photos │
//!                                             └──────────────────┘
//! ```

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod font;
pub mod health;
pub mod kafka_consumer;
pub mod memory;
pub mod metadata_store;
pub mod mime;
pub mod model;
pub mod object_store;
pub mod producer;
pub mod recycle;
pub mod upload;
pub mod watermark;
pub mod worker;

pub use config::Config;
pub use coordinator::{FailureAction, ProcessingOutcome, RetryCoordinator, RetryPolicy};
pub use dispatch::{Dispatcher, NotificationMessage, Notifier};
pub use error::{GalleryError, TransitionStage};
pub use health::HealthState;
pub use kafka_consumer::ProcessingConsumer;
pub use metadata_store::{PgPhotoRepository, PhotoRepository};
pub use mime::Codec;
pub use model::{
    DeleteStatus, ImageRecord, KeyLayout, ProcessingEvent, RecycleDirection, RecycleTransition,
};
pub use object_store::{ObjectStore, S3ObjectStore};
pub use producer::GalleryProducer;
pub use recycle::RecycleBin;
pub use upload::UploadService;
pub use watermark::{apply_watermark, WatermarkPlacement};
pub use worker::ImageWorker;
