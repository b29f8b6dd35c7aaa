pub(crate) mod admin;
pub(crate) mod applications;
pub(crate) mod callbacks;
pub(crate) mod disputes;
pub(crate) mod health;
pub(crate) mod payments;
pub(crate) mod stints;
