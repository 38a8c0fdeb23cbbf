pub mod broadcast;
pub mod fanout;
pub mod sweeper;
pub mod token_store;
pub mod webhook;

pub use broadcast::*;
pub use fanout::*;
pub use sweeper::*;
pub use token_store::*;
pub use webhook::*;
