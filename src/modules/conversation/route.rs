use actix_web::web::{scope, ServiceConfig};

use crate::modules::conversation::handle::*;

pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(
        scope("/conversations")
            .service(get_conversations)
            .service(start_conversation)
            .service(get_messages)
            .service(mark_read)
            .service(toggle_mute)
            .service(toggle_block)
            .service(archive_conversation),
    );
}
