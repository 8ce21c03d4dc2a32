use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use partflow::{
    config,
    db::{self},
    entities::{cart_reservation, sales_record, stock_item, warehouse_entry},
    events::{self, Event, EventSender},
    services::{
        cart::CartService,
        checkout::{CheckoutService, OrderLine},
        fulfillment::{CashierLine, FulfillmentService, PaymentInput, ServiceLine},
        sales::SalesService,
        stock::{CreateStockItemInput, StockFilter, StockService},
        warehouse::{Consumer, RouteLine, WarehouseService},
    },
    ListQuery, PipelineContext,
};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => handle_migrate(&context).await?,
        Commands::Stock(command) => handle_stock_command(&context, command, cli.json).await?,
        Commands::Cart(command) => handle_cart_command(&context, command, cli.json).await?,
        Commands::Order(command) => handle_order_command(&context, command, cli.json).await?,
        Commands::Report(command) => handle_report_command(&context, command, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "partflow",
    about = "Inventory transfer pipeline CLI",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    #[command(subcommand)]
    Stock(StockCommands),
    #[command(subcommand)]
    Cart(CartCommands),
    #[command(subcommand)]
    Order(OrderCommands),
    #[command(subcommand)]
    Report(ReportCommands),
}

#[derive(Subcommand)]
enum StockCommands {
    /// Create a catalog item
    Add(StockAddArgs),
    /// Book received stock into an item
    Receive(StockReceiveArgs),
    /// List catalog items
    List(StockListArgs),
}

#[derive(Subcommand)]
enum CartCommands {
    /// Reserve stock into a user's cart
    Add(CartLineArgs),
    /// Release reserved stock back to the ledger
    Remove(CartLineArgs),
    /// Show a user's reservations
    Show(CartShowArgs),
}

#[derive(Subcommand)]
enum OrderCommands {
    /// Submit cart lines as an order
    Submit(OrderSubmitArgs),
    /// Show an order's warehouse entries
    Show(OrderShowArgs),
    /// Route order lines downstream
    Route(OrderRouteArgs),
    /// Return service lines to stock
    Return(OrderReturnArgs),
    /// Record payment for cashier lines
    Pay(OrderPayArgs),
    /// Cancel the pending warehouse lines of an order
    Cancel(OrderCancelArgs),
}

#[derive(Subcommand)]
enum ReportCommands {
    /// Sales total and count for one calendar month
    Monthly(ReportMonthlyArgs),
}

#[derive(Args)]
struct StockAddArgs {
    #[arg(long)]
    brand: String,
    #[arg(long)]
    part_number: String,
    #[arg(long)]
    alt_part_number: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, help = "Vehicle fitment, free text")]
    application: Option<String>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long, value_parser = parse_decimal, default_value = "0")]
    cost_price: Decimal,
    #[arg(long, value_parser = parse_decimal, default_value = "0")]
    sell_price: Decimal,
    #[arg(long, default_value_t = 0, help = "Initial on-hand quantity")]
    quantity: i64,
}

#[derive(Args)]
struct StockReceiveArgs {
    #[arg(long)]
    item: i64,
    #[arg(long)]
    quantity: i64,
}

#[derive(Args)]
struct StockListArgs {
    #[arg(long, help = "Free-text search over brand, part numbers and description")]
    search: Option<String>,
    #[arg(long, value_enum, default_value_t = StockFilterArg::All)]
    filter: StockFilterArg,
    #[arg(long, help = "Sort column: brand or price")]
    sort_by: Option<String>,
    #[arg(long, help = "asc or desc")]
    sort_order: Option<String>,
    #[arg(long, default_value_t = 1)]
    page: u64,
    #[arg(long, default_value_t = 20)]
    limit: u64,
}

#[derive(Args)]
struct CartLineArgs {
    #[arg(long)]
    user: i64,
    #[arg(long)]
    item: i64,
    #[arg(long)]
    quantity: i64,
}

#[derive(Args)]
struct CartShowArgs {
    #[arg(long)]
    user: i64,
}

#[derive(Args)]
struct OrderSubmitArgs {
    #[arg(long)]
    user: i64,
    #[arg(long = "line", value_parser = parse_line, required = true, help = "Order line as STOCK_ITEM_ID:QTY, repeatable")]
    lines: Vec<(i64, i64)>,
}

#[derive(Args)]
struct OrderShowArgs {
    #[arg(long)]
    order: String,
}

#[derive(Args)]
struct OrderRouteArgs {
    #[arg(long)]
    order: String,
    #[arg(long, value_enum, default_value_t = SourceStageArg::Warehouse)]
    from: SourceStageArg,
    #[arg(long, value_enum)]
    to: ConsumerArg,
    #[arg(long = "line", value_parser = parse_line, required = true, help = "Line as ENTRY_ID:QTY, repeatable")]
    lines: Vec<(i64, i64)>,
}

#[derive(Args)]
struct OrderReturnArgs {
    #[arg(long)]
    order: String,
    #[arg(long = "line", value_parser = parse_line, required = true, help = "Line as SERVICE_ENTRY_ID:QTY, repeatable")]
    lines: Vec<(i64, i64)>,
}

#[derive(Args)]
struct OrderPayArgs {
    #[arg(long)]
    order: String,
    #[arg(long)]
    method: String,
    #[arg(long, value_parser = parse_decimal)]
    total: Decimal,
    #[arg(long = "line", value_parser = parse_line, required = true, help = "Line as CASHIER_ENTRY_ID:QTY, repeatable")]
    lines: Vec<(i64, i64)>,
}

#[derive(Args)]
struct OrderCancelArgs {
    #[arg(long)]
    order: String,
    #[arg(long)]
    reason: Option<String>,
}

#[derive(Args)]
struct ReportMonthlyArgs {
    #[arg(long)]
    year: i32,
    #[arg(long)]
    month: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum StockFilterArg {
    All,
    InStock,
    OutOfStock,
    LowStock,
}

impl From<StockFilterArg> for StockFilter {
    fn from(value: StockFilterArg) -> Self {
        match value {
            StockFilterArg::All => StockFilter::All,
            StockFilterArg::InStock => StockFilter::InStock,
            StockFilterArg::OutOfStock => StockFilter::OutOfStock,
            StockFilterArg::LowStock => StockFilter::LowStock,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ConsumerArg {
    Service,
    Cashier,
}

impl From<ConsumerArg> for Consumer {
    fn from(value: ConsumerArg) -> Self {
        match value {
            ConsumerArg::Service => Consumer::Service,
            ConsumerArg::Cashier => Consumer::Cashier,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceStageArg {
    Warehouse,
    Service,
}

struct CliContext {
    pipeline: PipelineContext,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        if config.auto_migrate {
            db::run_migrations(db.as_ref())
                .await
                .context("failed to run migrations")?;
        }

        let (event_tx, event_rx) = mpsc::channel::<Event>(config.event_channel_capacity);
        let event_sender = Arc::new(EventSender::new(event_tx));
        tokio::spawn(events::process_events(event_rx));

        Ok(Self {
            pipeline: PipelineContext::new(db, Arc::new(config), event_sender),
        })
    }

    fn stock_service(&self) -> StockService {
        self.pipeline.stock_service()
    }

    fn cart_service(&self) -> CartService {
        self.pipeline.cart_service()
    }

    fn checkout_service(&self) -> CheckoutService {
        self.pipeline.checkout_service()
    }

    fn warehouse_service(&self) -> WarehouseService {
        self.pipeline.warehouse_service()
    }

    fn fulfillment_service(&self) -> FulfillmentService {
        self.pipeline.fulfillment_service()
    }

    fn sales_service(&self) -> SalesService {
        self.pipeline.sales_service()
    }
}

async fn handle_migrate(context: &CliContext) -> Result<()> {
    db::run_migrations(context.pipeline.db.as_ref())
        .await
        .context("failed to run migrations")?;
    println!("Migrations applied");
    Ok(())
}

async fn handle_stock_command(
    context: &CliContext,
    command: StockCommands,
    json: bool,
) -> Result<()> {
    let service = context.stock_service();
    match command {
        StockCommands::Add(args) => {
            let item = service
                .create_item(CreateStockItemInput {
                    brand: args.brand,
                    part_number: args.part_number,
                    alt_part_number: args.alt_part_number,
                    description: args.description,
                    application: args.application,
                    location: args.location,
                    cost_price: args.cost_price,
                    sell_price: args.sell_price,
                    initial_quantity: args.quantity,
                })
                .await
                .context("failed to create stock item")?;
            if json {
                print_json(&item)?;
            } else {
                println!("Created stock item:");
                render_stock_item(&item);
            }
        }
        StockCommands::Receive(args) => {
            let item = service
                .receive_stock(args.item, args.quantity)
                .await
                .context("failed to receive stock")?;
            if json {
                print_json(&item)?;
            } else {
                println!(
                    "Received {} units into item {}: available {} / total {}",
                    args.quantity, item.id, item.available, item.total_quantity
                );
            }
        }
        StockCommands::List(args) => {
            let query = ListQuery {
                page: args.page,
                limit: args.limit,
                search: args.search,
                sort_by: args.sort_by,
                sort_order: args.sort_order,
            };
            let result = service
                .list_items(query, args.filter.into())
                .await
                .context("failed to list stock items")?;
            if json {
                print_json(&result)?;
            } else {
                let pages = result.total.div_ceil(result.limit.max(1)).max(1);
                println!(
                    "{} items (page {} of {})",
                    result.total, result.page, pages
                );
                for item in &result.items {
                    render_stock_item(item);
                }
            }
        }
    }
    Ok(())
}

async fn handle_cart_command(
    context: &CliContext,
    command: CartCommands,
    json: bool,
) -> Result<()> {
    let service = context.cart_service();
    match command {
        CartCommands::Add(args) => {
            let reservation = service
                .add_to_cart(args.user, args.item, args.quantity)
                .await
                .context("failed to add to cart")?;
            if json {
                print_json(&reservation)?;
            } else {
                println!(
                    "Reserved {} units of item {} for user {} (now {})",
                    args.quantity, args.item, args.user, reservation.quantity
                );
            }
        }
        CartCommands::Remove(args) => {
            let remaining = service
                .remove_from_cart(args.user, args.item, args.quantity)
                .await
                .context("failed to remove from cart")?;
            match (json, remaining) {
                (true, remaining) => print_json(&remaining)?,
                (false, Some(reservation)) => println!(
                    "Released stock; {} units of item {} still reserved",
                    reservation.quantity, args.item
                ),
                (false, None) => {
                    println!("Released stock; reservation for item {} cleared", args.item)
                }
            }
        }
        CartCommands::Show(args) => {
            let reservations = service
                .get_cart(args.user)
                .await
                .context("failed to load cart")?;
            if json {
                print_json(&reservations)?;
            } else if reservations.is_empty() {
                println!("Cart for user {} is empty", args.user);
            } else {
                println!("Cart for user {}:", args.user);
                for reservation in &reservations {
                    render_reservation(reservation);
                }
            }
        }
    }
    Ok(())
}

async fn handle_order_command(
    context: &CliContext,
    command: OrderCommands,
    json: bool,
) -> Result<()> {
    match command {
        OrderCommands::Submit(args) => {
            let lines = args
                .lines
                .into_iter()
                .map(|(stock_item_id, quantity)| OrderLine {
                    stock_item_id,
                    quantity,
                })
                .collect();
            let order = context
                .checkout_service()
                .submit_cart(args.user, lines)
                .await
                .context("failed to submit cart")?;
            if json {
                print_json(&order)?;
            } else {
                println!("Submitted order {}:", order.order_id);
                for entry in &order.entries {
                    render_warehouse_entry(entry);
                }
            }
        }
        OrderCommands::Show(args) => {
            let entries = context
                .warehouse_service()
                .get_order(&args.order)
                .await
                .context("failed to load order")?;
            if json {
                print_json(&entries)?;
            } else {
                println!("Order {}:", args.order);
                for entry in &entries {
                    render_warehouse_entry(entry);
                }
            }
        }
        OrderCommands::Route(args) => match args.from {
            SourceStageArg::Warehouse => {
                let lines = args
                    .lines
                    .into_iter()
                    .map(|(warehouse_entry_id, quantity)| RouteLine {
                        warehouse_entry_id,
                        quantity,
                    })
                    .collect();
                let routed = context
                    .warehouse_service()
                    .route_to_consumer(&args.order, args.to.into(), lines)
                    .await
                    .context("failed to route order lines")?;
                if json {
                    print_json(&routed)?;
                } else {
                    println!(
                        "Routed {} lines ({} units) of order {} to {}",
                        routed.lines, routed.quantity, routed.order_id, routed.consumer
                    );
                }
            }
            SourceStageArg::Service => {
                if !matches!(args.to, ConsumerArg::Cashier) {
                    anyhow::bail!("service lines can only be routed to the cashier");
                }
                let lines = args
                    .lines
                    .into_iter()
                    .map(|(service_entry_id, quantity)| ServiceLine {
                        service_entry_id,
                        quantity,
                    })
                    .collect();
                let routed = context
                    .fulfillment_service()
                    .service_to_cashier(&args.order, lines)
                    .await
                    .context("failed to route service lines")?;
                if json {
                    print_json(&routed)?;
                } else {
                    println!(
                        "Moved {} lines ({} units) of order {} to the cashier",
                        routed.lines, routed.quantity, routed.order_id
                    );
                }
            }
        },
        OrderCommands::Return(args) => {
            let lines = args
                .lines
                .into_iter()
                .map(|(service_entry_id, quantity)| ServiceLine {
                    service_entry_id,
                    quantity,
                })
                .collect();
            let returned = context
                .fulfillment_service()
                .service_return_to_stock(&args.order, lines)
                .await
                .context("failed to return lines to stock")?;
            if json {
                print_json(&returned)?;
            } else {
                println!(
                    "Returned {} units across {} lines of order {} to stock",
                    returned.quantity, returned.lines, returned.order_id
                );
            }
        }
        OrderCommands::Pay(args) => {
            let lines = args
                .lines
                .into_iter()
                .map(|(cashier_entry_id, quantity)| CashierLine {
                    cashier_entry_id,
                    quantity,
                })
                .collect();
            let records = context
                .fulfillment_service()
                .process_payment(
                    &args.order,
                    PaymentInput {
                        lines,
                        payment_method: args.method,
                        total_amount: args.total,
                    },
                )
                .await
                .context("failed to process payment")?;
            if json {
                print_json(&records)?;
            } else {
                println!("Recorded payment for order {}:", args.order);
                for record in &records {
                    render_sales_record(record);
                }
            }
        }
        OrderCommands::Cancel(args) => {
            let cancelled = context
                .warehouse_service()
                .cancel_order(&args.order, args.reason)
                .await
                .context("failed to cancel order")?;
            if json {
                print_json(&cancelled)?;
            } else {
                println!(
                    "Cancelled order {}: {} lines, {} units restocked",
                    cancelled.order_id, cancelled.lines_returned, cancelled.quantity_restocked
                );
            }
        }
    }
    Ok(())
}

async fn handle_report_command(
    context: &CliContext,
    command: ReportCommands,
    json: bool,
) -> Result<()> {
    match command {
        ReportCommands::Monthly(args) => {
            let report = context
                .sales_service()
                .monthly_report(args.year, args.month)
                .await
                .context("failed to build monthly report")?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "{}-{:02}: {} sales totalling {}",
                    report.year, report.month, report.sales_count, report.total_sales
                );
            }
        }
    }
    Ok(())
}

fn render_stock_item(item: &stock_item::Model) {
    println!(
        "- #{} {} {} • available {} / total {} • sell {}",
        item.id, item.brand, item.part_number, item.available, item.total_quantity, item.sell_price
    );
}

fn render_reservation(reservation: &cart_reservation::Model) {
    println!(
        "- item {} x{} (since {})",
        reservation.stock_item_id,
        reservation.quantity,
        reservation.created_at.format("%Y-%m-%d %H:%M")
    );
}

fn render_warehouse_entry(entry: &warehouse_entry::Model) {
    println!(
        "- entry {} • item {} {} x{} • unit {} • {:?}",
        entry.id,
        entry.stock_item_id,
        entry.part_number,
        entry.quantity,
        entry.unit_price,
        entry.status
    );
}

fn render_sales_record(record: &sales_record::Model) {
    println!(
        "- {} {} x{} • total {} via {}",
        record.brand, record.part_number, record.quantity, record.total_amount, record.payment_method
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_decimal(raw: &str) -> Result<Decimal, String> {
    use std::str::FromStr;
    Decimal::from_str(raw).map_err(|_| format!("invalid decimal '{raw}'"))
}

fn parse_line(raw: &str) -> Result<(i64, i64), String> {
    let (id, quantity) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected ID:QTY, got '{raw}'"))?;
    let id = id
        .trim()
        .parse()
        .map_err(|_| format!("invalid id in '{raw}'"))?;
    let quantity = quantity
        .trim()
        .parse()
        .map_err(|_| format!("invalid quantity in '{raw}'"))?;
    Ok((id, quantity))
}
