pub mod appointment;
pub mod clinical;
pub mod lifecycle;
pub mod requests;

pub use appointment::AppointmentService;
pub use clinical::{
    ClinicalDispatcher, ClinicalService, ClinicalServiceClient, FollowUp, NoopClinicalService,
    RecordingClinicalService,
};
pub use lifecycle::Transition;
pub use requests::RescheduleRequestService;
