use crate::backup::result_error::error::Error;
use crate::backup::result_error::WithMsg;

pub type Result<T> = std::result::Result<T, Error>;

impl<R, S: Into<String>> WithMsg<S> for Result<R> {
    fn with_msg(self, msg: S) -> Self {
        self.map_err(|e| e.with_msg(msg))
    }
}

/// `Ok` for no errors, the error itself for one, [`Error::LotsOfError`] otherwise.
pub fn convert_error_vec(mut errors: Vec<Error>) -> Result<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(errors.into()),
    }
}
