//! Page-level services built on the backend adapter: registration submission,
//! the administrator dashboard and the profile viewer.

pub mod dashboard;
pub mod profile;
pub mod registration;

pub use dashboard::{create_event, DashboardData, DashboardStats, NewEvent};
pub use profile::{load_profile, ProfileSource, ProfileView};
pub use registration::{
    Attachment, Attachments, RegistrationError, RegistrationForm, RegistrationOutcome,
    RegistrationService,
};
