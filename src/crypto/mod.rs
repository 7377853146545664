mod state;

pub use state::StateSigner;
