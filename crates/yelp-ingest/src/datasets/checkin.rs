//! Check-in days and their hourly counts.
//!
//! Hours point at the surrogate `day_id` of their day row, which only exists
//! once the first pass has committed. The second pass resolves it per day with
//! a lookup on the worker's own connection.

use super::{DatasetKind, DatasetProtocol, TransformContext};
use crate::batch::{Batch, Row, SqlValue};
use crate::db::TableWriter;
use crate::phase::{Pass, PhasePlan};
use crate::records::{clean_text, CheckinRecord};
use crate::schema::{CHECKIN_DAY, CHECKIN_DAY_ID, CHECKIN_HOUR};
use async_trait::async_trait;
use tracing::warn;
use yelp_common::{LoaderError, Result};

static PLAN: PhasePlan = PhasePlan {
    passes: &[
        Pass {
            label: "ADDING CHECKIN DAYS",
            tables: &[&CHECKIN_DAY],
        },
        Pass {
            label: "ADDING CHECKIN-HOURS",
            tables: &[&CHECKIN_HOUR],
        },
    ],
    fence_before_release: false,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct CheckinProtocol;

#[async_trait]
impl DatasetProtocol for CheckinProtocol {
    type Record = CheckinRecord;

    fn kind(&self) -> DatasetKind {
        DatasetKind::Checkin
    }

    fn plan(&self) -> &'static PhasePlan {
        &PLAN
    }

    async fn transform<W: TableWriter>(
        &self,
        pass: usize,
        records: &[CheckinRecord],
        cx: &mut TransformContext<'_, W>,
    ) -> Result<Vec<Batch>> {
        match pass {
            0 => {
                let mut days = Batch::new(&CHECKIN_DAY);
                for record in records {
                    for day in record.time.keys() {
                        days.push(
                            Row::new()
                                .set("day", clean_text(day))
                                .set("fk_business_id", &record.business_id),
                        )?;
                    }
                    cx.progress.tick();
                }
                Ok(vec![days])
            },
            1 => {
                let mut hours = Batch::new(&CHECKIN_HOUR);
                for record in records {
                    for (day, counts) in &record.time {
                        let day = clean_text(day);
                        let key = [
                            ("fk_business_id", SqlValue::from(&record.business_id)),
                            ("day", SqlValue::from(day.as_str())),
                        ];
                        let day_id = cx
                            .upserter
                            .lookup_id(&mut *cx.conn, &CHECKIN_DAY, CHECKIN_DAY_ID, &key)
                            .await?;

                        let Some(day_id) = day_id else {
                            warn!(
                                business_id = %record.business_id,
                                day = %day,
                                hours = counts.len(),
                                "No checkin_day row, skipping hours"
                            );
                            cx.orphans += counts.len() as u64;
                            continue;
                        };

                        for (hour, count) in counts {
                            hours.push(hour_row(day_id, hour, *count))?;
                        }
                    }
                    cx.progress.tick();
                }
                Ok(vec![hours])
            },
            other => Err(LoaderError::Worker(format!(
                "checkin plan has no pass {other}"
            ))),
        }
    }
}

fn hour_row(day_id: i64, hour: &str, count: i64) -> Row {
    Row::new()
        .set("fk_day_id", day_id)
        .set("total_checkins", count)
        .set("hour", clean_text(hour))
}
