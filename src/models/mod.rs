pub mod action;
pub mod result;
pub mod ticket;
