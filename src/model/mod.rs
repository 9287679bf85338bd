pub mod series;

pub use series::{Bar, PriceSeries};
