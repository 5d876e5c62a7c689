pub mod status;

pub use status::{QueueView, TrackView};
