//! Security type 1 ("None"): no authentication exchange at all.

use crate::errors::RfbClientError;

pub fn authenticate() -> Result<(), RfbClientError> {
    Ok(())
}
