pub mod contact;
pub mod division;
pub mod guest;
pub mod guest_status;
pub mod staff;
pub mod visit;
