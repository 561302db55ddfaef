use std::sync::Arc;

use sayhi_db::Database;
use sayhi_gateway::dispatcher::Dispatcher;

use crate::conversation::ConversationService;
use crate::media::MediaStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    /// Mark the session cookie `Secure`; on whenever served over HTTPS
    pub secure_cookies: bool,
    pub dispatcher: Dispatcher,
    pub conversations: ConversationService,
    pub media: Arc<dyn MediaStore>,
}
