#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AttendeeRow {
    pub id: String,
    pub name: String,
    pub contact: String,
    pub photo_path: String,
    pub poster_path: String,
    pub public_token: String,
    pub referred_by: Option<String>,
    pub referral_count: i64,
    pub created_at: String,
}
