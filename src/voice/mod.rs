//! Voice output
//!
//! Audio fragments announced on the chat socket are probed until the backend
//! has finished writing them, then played strictly in arrival order.

mod playback;
mod sequencer;
mod waiter;

pub use playback::{AudioPlayback, AudioSink, SpeakerSink, decode_mp3};
pub use sequencer::{AudioFragmentRef, PlaybackSequencer, PlaybackState, resolve_asset_url};
pub use waiter::{AssetProbe, AssetWaiter, HttpProbe};
