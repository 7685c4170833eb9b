use anyhow::Result;
use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::info;

use crate::models::NewProduct;
use crate::schema::products;

pub fn demo_products() -> Vec<NewProduct> {
    vec![
        NewProduct::new("Flight A1", "flight", BigDecimal::from(100), 100),
        NewProduct::new("Flight B2", "flight", BigDecimal::from(150), 50),
    ]
}

/// Inserts the demo catalogue into an empty products table.
pub async fn seed_products(conn: &mut AsyncPgConnection) -> Result<usize> {
    let existing: i64 = products::table.count().get_result(conn).await?;
    if existing > 0 {
        info!("Products already seeded ({} rows)", existing);
        return Ok(0);
    }

    let inserted = diesel::insert_into(products::table)
        .values(&demo_products())
        .execute(conn)
        .await?;
    info!("Seeded {} products", inserted);
    Ok(inserted)
}
