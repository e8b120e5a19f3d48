//! Typed resource helpers built on the scheduler

mod cards;

pub use cards::{Card, CardAdd, Cards, Label, LabelAdd, LabelColor};
