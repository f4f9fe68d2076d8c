use crate::utils::dni::normalize;
use anyhow::{Result, anyhow};
use autoscale_cuckoo_filter::CuckooFilter;
use futures::StreamExt;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::sync::RwLock;

const FILTER_CAPACITY: usize = 100_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

static DNI_FILTER: Lazy<RwLock<CuckooFilter<String>>> =
    Lazy::new(|| RwLock::new(CuckooFilter::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE)));

/// false means the DNI is certainly not registered; true needs a DB check.
pub fn might_exist(dni: &str) -> bool {
    let dni = normalize(dni);
    match DNI_FILTER.read() {
        Ok(filter) => filter.contains(&dni),
        // a poisoned filter can't answer negatives
        Err(_) => true,
    }
}

pub fn insert(dni: &str) {
    let dni = normalize(dni);
    if let Ok(mut filter) = DNI_FILTER.write() {
        filter.add(&dni);
    }
}

/// Called when an admin changes a user's DNI.
pub fn remove(dni: &str) {
    let dni = normalize(dni);
    if let Ok(mut filter) = DNI_FILTER.write() {
        filter.remove(&dni);
    }
}

pub async fn warmup_dni_filter(pool: &MySqlPool, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (String,)>("SELECT dni FROM users").fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        let (dni,) = row.map_err(|e| anyhow!("DB row fetch failed: {}", e))?;

        batch.push(normalize(&dni));
        total += 1;

        if batch.len() == batch_size {
            insert_batch(&batch);
            batch.clear();
        }
    }

    if !batch.is_empty() {
        insert_batch(&batch);
    }

    log::info!("DNI filter warmup complete: {} users", total);
    Ok(())
}

fn insert_batch(dnis: &[String]) {
    if let Ok(mut filter) = DNI_FILTER.write() {
        for dni in dnis {
            filter.add(dni);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_dni_might_exist_regardless_of_case() {
        insert("87654321x");
        assert!(might_exist("87654321X"));
        remove("87654321X");
        assert!(!might_exist("87654321X"));
    }

    #[test]
    fn batch_insert() {
        insert_batch(&["11111111H".to_string(), "22222222J".to_string()]);
        assert!(might_exist("11111111h"));
        assert!(might_exist("22222222J"));
    }
}
