//! Publish targets: where evaluated content gets posted.

pub mod x_client;

pub use x_client::{
    parse_thread_content, MockPublishTarget, PostError, PostOutcome, PublishTarget, XClient,
};
