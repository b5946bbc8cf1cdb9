//! Parties domain module: the shop's customers and suppliers.
//!
//! Parties are reference targets: device loans and sales point at a customer,
//! device units at a supplier, bookings optionally at a registered customer.

pub mod party;

pub use party::{
    ContactInfo, DeleteParty, Party, PartyCommand, PartyDeleted, PartyEvent, PartyId, PartyKind,
    PartyRegistered, PartyUpdated, RegisterParty, UpdateParty,
};
