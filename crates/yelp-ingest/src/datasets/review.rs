//! Reviews.

use super::{DatasetKind, DatasetProtocol, TransformContext};
use crate::batch::{Batch, Row};
use crate::db::TableWriter;
use crate::phase::{Pass, PhasePlan};
use crate::records::{clean_text, ReviewRecord};
use crate::schema::REVIEW;
use async_trait::async_trait;
use yelp_common::Result;

static PLAN: PhasePlan = PhasePlan {
    passes: &[Pass {
        label: "ADDING REVIEWS",
        tables: &[&REVIEW],
    }],
    fence_before_release: false,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewProtocol;

#[async_trait]
impl DatasetProtocol for ReviewProtocol {
    type Record = ReviewRecord;

    fn kind(&self) -> DatasetKind {
        DatasetKind::Review
    }

    fn plan(&self) -> &'static PhasePlan {
        &PLAN
    }

    async fn transform<W: TableWriter>(
        &self,
        _pass: usize,
        records: &[ReviewRecord],
        cx: &mut TransformContext<'_, W>,
    ) -> Result<Vec<Batch>> {
        let mut reviews = Batch::new(&REVIEW);
        for record in records {
            reviews.push(
                Row::new()
                    .set("review_id", &record.review_id)
                    .set("fk_user_id", &record.user_id)
                    .set("fk_business_id", &record.business_id)
                    .set("stars", record.stars)
                    .set("date", record.date)
                    .set("text", clean_text(&record.text))
                    .set("useful", record.useful)
                    .set("funny", record.funny)
                    .set("cool", record.cool),
            )?;
            cx.progress.tick();
        }
        Ok(vec![reviews])
    }
}
