//! Target tables and their conflict keys.
//!
//! The schema itself is provisioned elsewhere. The loader only needs to know
//! each table's name and which columns identify a duplicate row. `zipcode` is
//! part of the schema but never written here.

/// A destination table for conflict-skip inserts.
#[derive(Debug, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    /// Columns of the unique constraint used in `ON CONFLICT (...) DO NOTHING`.
    /// Empty means plain inserts.
    pub conflict_columns: &'static [&'static str],
}

impl std::fmt::Display for TableSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

pub const BUSINESS: TableSpec = TableSpec {
    name: "business",
    conflict_columns: &["business_id"],
};

pub const CATEGORIES: TableSpec = TableSpec {
    name: "categories",
    conflict_columns: &["category"],
};

pub const BUSINESS_CATEGORIES: TableSpec = TableSpec {
    name: "business_categories",
    conflict_columns: &["fk_business_id", "fk_category"],
};

pub const BUSINESS_HOURS: TableSpec = TableSpec {
    name: "business_hours",
    conflict_columns: &["fk_business_id", "day_of_week"],
};

pub const YELP_USER: TableSpec = TableSpec {
    name: "yelp_user",
    conflict_columns: &["user_id"],
};

pub const FRIEND: TableSpec = TableSpec {
    name: "friend",
    conflict_columns: &["fk_friend_id", "fk_user_id"],
};

pub const REVIEW: TableSpec = TableSpec {
    name: "review",
    conflict_columns: &["review_id"],
};

pub const CHECKIN_DAY: TableSpec = TableSpec {
    name: "checkin_day",
    conflict_columns: &["fk_business_id", "day"],
};

/// Surrogate key of `checkin_day`, referenced by `checkin_hour.fk_day_id`.
pub const CHECKIN_DAY_ID: &str = "day_id";

pub const CHECKIN_HOUR: TableSpec = TableSpec {
    name: "checkin_hour",
    conflict_columns: &["fk_day_id", "hour"],
};
