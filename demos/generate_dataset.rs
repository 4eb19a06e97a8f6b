use std::env;
use std::fs::{create_dir_all, File};
use std::io::{self, stdout, BufWriter, Write};
use std::path::Path;

use rand::seq::IndexedRandom;
use rand::Rng;

const PROBABILITY_INVALID: f64 = 0.01;
const PROBABILITY_DUPLICATE: f64 = 0.002;
const PROBABILITY_OUTLIER: f64 = 0.001;
const PROBABILITY_ANONYMOUS: f64 = 0.05;

const ZONES: [&str; 12] = [
    "NORTH", "SOUTH", "EAST", "WEST", "CENTRAL", "HARBOUR",
    "AIRPORT", "OLD_TOWN", "UNIVERSITY", "INDUSTRIAL", "RIVERSIDE", "HILLS"
];

const CATEGORIES: [&str; 10] = [
    "groceries", "GROCERY", "fuel", "dining", "electronics",
    "fashion", "health", "utilities", "travel", "education"
];

/// Generated timestamps fall within 2024 (UTC).
const YEAR_START: i64 = 1_704_067_200;
const YEAR_SECONDS: i64 = 366 * 24 * 60 * 60;

struct GeneratorConfig {
    num_records: usize,
    num_merchants: usize,
    num_customers: usize,
    output_dir: String
}

impl GeneratorConfig {
    fn from_args() -> Self {
        let args: Vec<String> = env::args().collect();
        let num_records = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(1_000_000);
        let num_merchants = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(5_000);
        let num_customers = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(200_000);

        Self {
            num_records,
            num_merchants: num_merchants.max(1),
            num_customers: num_customers.max(1),
            output_dir: "samples/generated".to_string()
        }
    }
}

fn main() -> io::Result<()> {
    let config = GeneratorConfig::from_args();
    let output_dir = Path::new(&config.output_dir);

    println!(
        "Generating {} transactions over {} merchants and {} customers in {}...",
        config.num_records, config.num_merchants, config.num_customers, config.output_dir
    );

    create_dir_all(output_dir)?;

    let mut rng = rand::rng();

    write_merchants(&mut BufWriter::new(File::create(output_dir.join("merchants.csv"))?), config.num_merchants)?;

    let mut writer = BufWriter::new(File::create(output_dir.join("transactions.csv"))?);
    writeln!(writer, "TRANSACTION_ID,MERCHANT_ID,ZONE,CATEGORY,AMOUNT,TIMESTAMP,CUSTOMER_ID")?;

    // Roughly a tenth of merchants never trade, so the dormancy report has something to find.
    let active_merchants = (config.num_merchants * 9 / 10).max(1);

    for index in 1..=config.num_records {
        let roll: f64 = rng.random();

        if roll < PROBABILITY_INVALID {
            generate_invalid_record(&mut writer, &mut rng, index)?;
        } else if roll < PROBABILITY_INVALID + PROBABILITY_DUPLICATE && index > 1 {
            let earlier = rng.random_range(1..index);
            generate_transaction(&mut writer, &mut rng, earlier, active_merchants, config.num_customers)?;
        } else {
            generate_transaction(&mut writer, &mut rng, index, active_merchants, config.num_customers)?;
        }

        if index % 100_000 == 0 {
            print!(".");
            stdout().flush()?;
        }
    }

    writer.flush()?;
    println!("\nGeneration complete.");

    Ok(())
}

fn write_merchants<W: Write>(writer: &mut W, num_merchants: usize) -> io::Result<()> {
    writeln!(writer, "merchant_id,merchant_name")?;

    for merchant in 1..=num_merchants {
        writeln!(writer, "M{merchant:06},Merchant {merchant}")?;
    }

    writer.flush()
}

fn generate_amount<R: Rng>(rng: &mut R) -> String {
    let amount: f64 = if rng.random_bool(PROBABILITY_OUTLIER) {
        rng.random_range(5_000.0..50_000.0)
    } else {
        rng.random_range(1.0..250.0)
    };

    format!("{amount:.2}")
}

fn generate_timestamp<R: Rng>(rng: &mut R) -> String {
    let seconds = YEAR_START + rng.random_range(0..YEAR_SECONDS);

    chrono::DateTime::from_timestamp(seconds, 0)
        .map(|timestamp| timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

fn generate_transaction<W: Write, R: Rng>(writer: &mut W, rng: &mut R, index: usize, merchants: usize, customers: usize) -> io::Result<()> {
    let merchant = rng.random_range(1..=merchants);
    let zone = ZONES.choose(rng).copied().unwrap_or("NORTH");
    let category = CATEGORIES.choose(rng).copied().unwrap_or("groceries");
    let customer = if rng.random_bool(PROBABILITY_ANONYMOUS) {
        String::new()
    } else {
        format!("C{:07}", rng.random_range(1..=customers))
    };

    writeln!(
        writer,
        "TX{index:010},M{merchant:06},{zone},{category},{},{},{customer}",
        generate_amount(rng),
        generate_timestamp(rng)
    )
}

fn generate_invalid_record<W: Write, R: Rng>(writer: &mut W, rng: &mut R, index: usize) -> io::Result<()> {
    let invalid_types = [
        format!("TX{index:010},M000001,NORTH,fuel,not-a-number,2024-01-01T00:00:00Z,C0000001"),
        format!("TX{index:010},M000001,NORTH,fuel,-12.00,2024-01-01T00:00:00Z,C0000001"),
        format!("TX{index:010},M000001,NORTH,fuel,12.00,someday,C0000001"),
        format!("TX{index:010},M000001,,fuel,12.00,2024-01-01T00:00:00Z,C0000001"),
        format!("TX{index:010},M000001,NORTH"),
        format!(",M000001,NORTH,fuel,12.00,2024-01-01T00:00:00Z,C0000001"),
        "junk,junk,junk,junk,junk,junk,junk".to_string()
    ];

    match invalid_types.choose(rng) {
        Some(record) => writeln!(writer, "{record}"),
        None => Ok(())
    }
}
