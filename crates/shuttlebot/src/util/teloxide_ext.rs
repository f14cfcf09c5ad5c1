use easy_ext::ext;
use teloxide::types::{Chat, User};

pub(crate) mod prelude {
    pub(crate) use super::{ChatExt as _, UserExt as _};
}

#[ext(UserExt)]
pub(crate) impl User {
    /// Name to tag the user with in replies. Falls back to the full name
    /// for users without a username.
    fn display_name(&self) -> String {
        self.username.clone().unwrap_or_else(|| self.full_name())
    }

    fn debug_id(&self) -> String {
        format!("{} ({})", self.display_name(), self.id)
    }
}

#[ext(ChatExt)]
pub(crate) impl Chat {
    fn debug_id(&self) -> String {
        let title = self.title().unwrap_or("{unknown_chat_title}");
        let username = self
            .username()
            .map(|name| format!("{name}, "))
            .unwrap_or_default();

        format!("{title} ({username}{})", self.id)
    }
}
