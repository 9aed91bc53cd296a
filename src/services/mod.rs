pub mod invite_service;
pub mod poster_service;
pub mod referral_service;
pub mod render_service;
pub mod share_service;
pub mod template_service;
