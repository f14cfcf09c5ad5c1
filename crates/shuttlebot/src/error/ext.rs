use super::{err, ErrorKind, Result};
use crate::util::DynError;
use easy_ext::ext;

#[ext(OptionExt)]
pub(crate) impl<T> Option<T> {
    #[track_caller]
    fn fatal_ctx<S>(self, message: impl FnOnce() -> S) -> Result<T>
    where
        S: Into<String>,
    {
        match self {
            Some(value) => Ok(value),
            None => {
                let message: String = message().into();
                Err(err!(ErrorKind::Fatal {
                    message,
                    source: None::<Box<DynError>>,
                }))
            }
        }
    }
}
