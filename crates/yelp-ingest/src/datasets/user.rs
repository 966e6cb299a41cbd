//! Users and the friend graph.

use super::{DatasetKind, DatasetProtocol, TransformContext};
use crate::batch::{Batch, Row};
use crate::db::TableWriter;
use crate::phase::{Pass, PhasePlan};
use crate::records::{clean_text, UserRecord};
use crate::schema::{FRIEND, YELP_USER};
use async_trait::async_trait;
use yelp_common::{LoaderError, Result};

/// Friend edges reference users, so every user is written before the second
/// pass rescans the partition for friends.
static PLAN: PhasePlan = PhasePlan {
    passes: &[
        Pass {
            label: "ADDING USERS",
            tables: &[&YELP_USER],
        },
        Pass {
            label: "ADDING FRIENDS",
            tables: &[&FRIEND],
        },
    ],
    fence_before_release: false,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct UserProtocol;

#[async_trait]
impl DatasetProtocol for UserProtocol {
    type Record = UserRecord;

    fn kind(&self) -> DatasetKind {
        DatasetKind::User
    }

    fn plan(&self) -> &'static PhasePlan {
        &PLAN
    }

    async fn transform<W: TableWriter>(
        &self,
        pass: usize,
        records: &[UserRecord],
        cx: &mut TransformContext<'_, W>,
    ) -> Result<Vec<Batch>> {
        match pass {
            0 => {
                let mut users = Batch::new(&YELP_USER);
                for record in records {
                    users.push(user_row(record))?;
                    cx.progress.tick();
                }
                Ok(vec![users])
            },
            1 => {
                let mut friends = Batch::new(&FRIEND);
                for record in records {
                    for friend in &record.friends {
                        friends.push(
                            Row::new()
                                .set("fk_user_id", &record.user_id)
                                .set("fk_friend_id", friend),
                        )?;
                    }
                    cx.progress.tick();
                }
                Ok(vec![friends])
            },
            other => Err(LoaderError::Worker(format!("user plan has no pass {other}"))),
        }
    }
}

fn user_row(record: &UserRecord) -> Row {
    Row::new()
        .set("user_id", &record.user_id)
        .set("name", clean_text(&record.name))
        .set("yelping_since", record.yelping_since)
        .set("review_count", record.review_count)
        .set("fans", record.fans)
        .set("average_stars", record.average_stars)
        .set("funny", record.funny)
        .set("useful", record.useful)
        .set("cool", record.cool)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::batch::SqlValue;
    use chrono::NaiveDate;

    #[test]
    fn test_user_row_columns() {
        let record = UserRecord {
            user_id: "u1".into(),
            name: "Ann".into(),
            yelping_since: NaiveDate::from_ymd_opt(2010, 5, 1).unwrap(),
            review_count: 12,
            fans: 3,
            average_stars: 4.25,
            funny: 1,
            useful: 2,
            cool: 3,
            friends: vec!["u2".into()],
        };
        let row = user_row(&record);
        assert_eq!(row.len(), 9);
        assert_eq!(
            row.get("yelping_since"),
            Some(&SqlValue::Date(NaiveDate::from_ymd_opt(2010, 5, 1).unwrap()))
        );
        assert_eq!(row.get("average_stars"), Some(&SqlValue::Float(4.25)));
        assert!(row.get("friends").is_none());
    }

    #[test]
    fn test_plan_has_fence_between_passes() {
        assert_eq!(PLAN.passes.len(), 2);
        assert_eq!(PLAN.fence_count(), 1);
    }
}
