pub mod detail;
pub mod fetcher;
pub mod listing;
pub mod traits;

pub use detail::{DetailFetcher, Fetched};
pub use fetcher::{build_transport, DirectTransport, SessionTransport};
pub use listing::ListingFetcher;
pub use traits::Transport;
