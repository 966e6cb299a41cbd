//! Businesses, their categories and opening hours.

use super::{DatasetKind, DatasetProtocol, TransformContext};
use crate::batch::{Batch, Row};
use crate::db::TableWriter;
use crate::phase::{Pass, PhasePlan};
use crate::records::{clean_text, BusinessRecord};
use crate::schema::{BUSINESS, BUSINESS_CATEGORIES, BUSINESS_HOURS, CATEGORIES};
use async_trait::async_trait;
use yelp_common::Result;

/// Categories and hours reference businesses, and business_categories
/// references categories, so every table is fenced from the next. The final
/// fence keeps each connection until all workers are done writing.
static PLAN: PhasePlan = PhasePlan {
    passes: &[Pass {
        label: "ADDING BUSINESSES",
        tables: &[&BUSINESS, &CATEGORIES, &BUSINESS_CATEGORIES, &BUSINESS_HOURS],
    }],
    fence_before_release: true,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct BusinessProtocol;

#[async_trait]
impl DatasetProtocol for BusinessProtocol {
    type Record = BusinessRecord;

    fn kind(&self) -> DatasetKind {
        DatasetKind::Business
    }

    fn plan(&self) -> &'static PhasePlan {
        &PLAN
    }

    async fn transform<W: TableWriter>(
        &self,
        _pass: usize,
        records: &[BusinessRecord],
        cx: &mut TransformContext<'_, W>,
    ) -> Result<Vec<Batch>> {
        let mut businesses = Batch::new(&BUSINESS);
        let mut categories = Batch::new(&CATEGORIES);
        let mut links = Batch::new(&BUSINESS_CATEGORIES);
        let mut hours = Batch::new(&BUSINESS_HOURS);

        for record in records {
            businesses.push(business_row(record))?;

            for category in &record.categories {
                categories.push(Row::new().set("category", clean_text(category)))?;
                links.push(
                    Row::new()
                        .set("fk_business_id", &record.business_id)
                        .set("fk_category", clean_text(category)),
                )?;
            }

            for (day, open) in &record.hours {
                hours.push(
                    Row::new()
                        .set("fk_business_id", &record.business_id)
                        .set("day_of_week", day)
                        .set("hours", open),
                )?;
            }

            cx.progress.tick();
        }

        Ok(vec![businesses, categories, links, hours])
    }
}

/// Aggregates (`stars`, `review_count`, ...) start at zero and are maintained
/// by the database as reviews and check-ins arrive.
fn business_row(record: &BusinessRecord) -> Row {
    Row::new()
        .set("business_id", &record.business_id)
        .set("name", clean_text(&record.name))
        .set("address", clean_text(&record.address))
        .set("city", clean_text(&record.city))
        .set("state", &record.state)
        .set("fk_zipcode", &record.postal_code)
        .set("latitude", record.latitude)
        .set("longitude", record.longitude)
        .set("stars", 0.0)
        .set("total_stars", 0.0)
        .set("review_count", 0_i64)
        .set("num_checkins", 0_i64)
}
