//! reserved property names maintained by the repository itself

pub const TYPE: &str = "strata_type";
pub const SIZE: &str = "strata_size";
pub const LAST_MODIFIED: &str = "strata_lastModified";
pub const MIME_TYPE: &str = "strata_mimeType";
pub const ENCODING: &str = "strata_encoding";

pub const IS_CHECKED_OUT: &str = "strata_isCheckedOut";
pub const CHECKOUT_USER: &str = "strata_checkoutUserID";
pub const CHECKOUT_DATE: &str = "strata_checkoutDate";
pub const CHECKIN_DATE: &str = "strata_checkinDate";
pub const TOTAL_REVISIONS: &str = "strata_totalRevisions";

pub const REVISION_CREATION_DATE: &str = "strata_revisionCreationDate";
pub const REVISION_CREATOR: &str = "strata_revisionCreatorID";
pub const REVISION_COMMENT: &str = "strata_revisionComment";
pub const REVISION_TAG: &str = "strata_revisionTag";
