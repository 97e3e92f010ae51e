pub mod balance;
pub mod token;
pub mod unwrap;
