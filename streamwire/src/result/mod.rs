//! Results handed out by an enumeration and the cells they are made of.

pub mod cell;
pub mod row;
