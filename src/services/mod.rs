pub mod amount;
pub mod audit;
pub mod bookings;
pub mod cleanup;
pub mod events;
pub mod gateway;
pub mod ledger;
pub mod notifications;
pub mod payments;
pub mod webhook;
