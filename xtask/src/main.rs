use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;

use leafshop_core::{
    AwsConfig, CouponEngine, CouponInput, DiscountType, DynamoStore, InventoryLedger,
    ServiceConfig, StockInput,
};

/// Leafshop project automation tool
#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "A task runner for the Leafshop backend")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the DynamoDB table for an environment
    Init {
        /// AWS region to deploy to
        #[arg(short, long, default_value = "us-west-2")]
        region: String,
        /// Environment name (dev, staging, prod)
        #[arg(short, long, default_value = "dev")]
        env: String,
    },
    /// Load demo warehouses, stock, and coupons into an environment
    Seed {
        /// AWS region to target
        #[arg(short, long, default_value = "us-west-2")]
        region: String,
        /// Environment name (dev, staging, prod)
        #[arg(short, long, default_value = "dev")]
        env: String,
    },
    /// Print inventory lines at or below their reorder point
    LowStock {
        /// AWS region to target
        #[arg(short, long, default_value = "us-west-2")]
        region: String,
        /// Environment name (dev, staging, prod)
        #[arg(short, long, default_value = "dev")]
        env: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Init { region, env } => {
            println!("{}", "🏗️  Creating the store table...".green().bold());
            init_command(&region, &env).await?;
        }
        Command::Seed { region, env } => {
            println!("{}", "🌱 Seeding demo data...".blue().bold());
            seed_command(&region, &env).await?;
        }
        Command::LowStock { region, env } => {
            println!("{}", "📉 Checking stock levels...".yellow().bold());
            low_stock_command(&region, &env).await?;
        }
    }

    println!("{}", "✅ Task completed successfully!".green().bold());
    Ok(())
}

async fn store_for(region: &str, env: &str) -> Result<DynamoStore> {
    let mut config = ServiceConfig::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    config.aws_region = region.to_string();
    config.environment = env.to_string();

    let aws = AwsConfig::new(&config.aws_region).await;
    Ok(DynamoStore::new(aws.dynamodb, config.table_name()))
}

async fn init_command(region: &str, env: &str) -> Result<()> {
    let store = store_for(region, env).await?;
    println!("📋 Table: {}", store.table_name());
    store
        .create_table_if_missing()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(())
}

async fn seed_command(region: &str, env: &str) -> Result<()> {
    let config = ServiceConfig::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let store = Arc::new(store_for(region, env).await?);
    let ledger = InventoryLedger::new(store.clone(), config.retry_config());
    let coupons = CouponEngine::new(store, config.retry_config());

    println!("🏭 Creating warehouses...");
    for (id, name, location) in [
        ("wh-east", "East Fulfillment", "Newark, NJ"),
        ("wh-west", "West Fulfillment", "Reno, NV"),
    ] {
        match ledger
            .create_warehouse(id, name, Some(location.to_string()))
            .await
        {
            Ok(_) => println!("  created {id}"),
            Err(e) => println!("  {id}: {e}"),
        }
    }

    println!("📦 Creating stock lines...");
    let lines = [
        ("wh-east", "tea-sencha", None, 120),
        ("wh-east", "tea-assam", Some("tin-250g"), 40),
        ("wh-west", "tea-sencha", None, 80),
        ("wh-west", "tea-assam", Some("tin-250g"), 25),
    ];
    for (warehouse, product, variant, quantity) in lines {
        let input = StockInput {
            product_id: product.to_string(),
            variant_id: variant.map(str::to_string),
            quantity,
            reorder_point: Some(10),
            max_stock: Some(500),
            location: None,
        };
        match ledger.create_stock(warehouse, input).await {
            Ok(_) => println!("  {warehouse}/{product} x{quantity}"),
            Err(e) => println!("  {warehouse}/{product}: {e}"),
        }
    }

    println!("🎟️  Creating coupons...");
    let save10 = CouponInput {
        coupon_code: "SAVE10".to_string(),
        coupon_name: "10% off orders over $50".to_string(),
        description: Some("Launch promotion".to_string()),
        discount_type: DiscountType::Percentage,
        discount_value: 10.0,
        min_purchase_amount: Some(50.0),
        max_discount_amount: Some(25.0),
        usage_limit: Some(1000),
        usage_limit_per_user: Some(1),
        valid_from: None,
        valid_until: None,
        is_active: true,
        applicable_products: vec![],
        applicable_categories: vec![],
        excluded_products: vec![],
    };
    match coupons.create(save10).await {
        Ok(meta) => println!("  created {}", meta.coupon_code),
        Err(e) => println!("  SAVE10: {e}"),
    }

    Ok(())
}

async fn low_stock_command(region: &str, env: &str) -> Result<()> {
    let config = ServiceConfig::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let store = Arc::new(store_for(region, env).await?);
    let ledger = InventoryLedger::new(store, config.retry_config());

    let report = ledger
        .low_stock_report()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    if report.is_empty() {
        println!("All stock lines are above their reorder points.");
        return Ok(());
    }

    for line in report {
        let variant = line.variant_id.as_deref().unwrap_or("-");
        println!(
            "{} {}/{} ({variant}): {} available, reorder at {}",
            "LOW".red().bold(),
            line.warehouse_id,
            line.product_id,
            line.available_quantity,
            line.reorder_point
        );
    }
    Ok(())
}
