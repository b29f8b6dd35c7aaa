use mongodb::{
    bson::{doc, Document},
    options::IndexOptions,
    Database, IndexModel,
};

use crate::errors::Result;

/// Unique only over documents that carry the key, for slots that are
/// cleared when a record stops being active.
fn while_set(field: &str) -> Option<Document> {
    Some(doc! { field: { "$exists": true } })
}

/// Creates the lookup indexes and the unique indexes behind one payout per
/// stint, one active intent per application and one live application per
/// professional. Safe to run on every start; existing indexes are left alone.
pub async fn ensure_indexes(db: &Database) -> Result<()> {
    let specs: [(&str, Document, bool, Option<Document>); 10] = [
        ("stints", doc! { "employer_id": 1, "created_at": -1 }, false, None),
        ("stints", doc! { "status": 1 }, false, None),
        ("applications", doc! { "stint_id": 1, "professional_id": 1 }, false, None),
        ("applications", doc! { "active_slot": 1 }, true, while_set("active_slot")),
        ("payment_intents", doc! { "stint_id": 1, "application_id": 1, "status": 1 }, false, None),
        ("payment_intents", doc! { "gateway_ref": 1 }, false, None),
        ("payment_intents", doc! { "active_slot": 1 }, true, while_set("active_slot")),
        ("disputes", doc! { "stint_id": 1 }, false, None),
        ("payouts", doc! { "stint_id": 1 }, true, None),
        ("payouts", doc! { "gateway_ref": 1 }, false, None),
    ];

    let mut created = 0;
    for (collection, keys, unique, partial) in specs {
        let options = IndexOptions::builder()
            .unique(unique)
            .partial_filter_expression(partial)
            .build();
        let model = IndexModel::builder().keys(keys).options(options).build();
        db.collection::<Document>(collection).create_index(model).await?;
        created += 1;
    }

    tracing::info!("Index bootstrap complete ({} indexes ensured)", created);
    Ok(())
}
