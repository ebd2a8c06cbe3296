pub mod booking;
pub mod event;
pub mod payment;
pub mod ticket_type;
pub mod webhook;

pub use booking::{Booking, Contact, PaymentLedger, PaymentStatus, GATEWAY_OFFLINE, GATEWAY_STRIPE};
pub use event::{PaymentEvent, PaymentEventKind};
pub use payment::{AttemptStatus, Payment};
pub use ticket_type::{TicketSelection, TicketType};
pub use webhook::WebhookEvent;
