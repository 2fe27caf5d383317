//! Application services composing the domain with the store and the
//! external payment collaborator.

pub mod checkout;
pub mod gateway;
