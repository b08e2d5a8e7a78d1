use clap::{
    ArgGroup,
    Args as ClapArgs,
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use redpacket_client::{
    action::{
        Action,
        CreateRequest,
        parse_item_ids,
    },
    client::RedPacketClient,
    config::{
        ClientConfig,
        DEFAULT_LOCAL_GATEWAY_URL,
    },
    deployment::{
        LedgerRegistry,
        Network,
    },
    eligibility::{
        EligibilityInput,
        EligibilityWatcher,
    },
    format::{
        parse_units,
        short_hex,
    },
    gateway::{
        GatewayOptions,
        HttpGateway,
    },
    ledger::{
        ListCategory,
        TokenReader,
    },
    orchestrator::{
        AttemptUpdate,
        Phase,
    },
    types::{
        Address,
        parse_address,
        parse_packet_id,
    },
};
use std::{
    fs,
    path::Path,
    time::Duration,
};
use tokio::{
    sync::{
        mpsc,
        watch,
    },
    time,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

#[derive(Parser, Debug)]
#[command(
    name = "redpacket",
    about = "Create, claim and refund red packets on the ledger",
    version,
    group(ArgGroup::new("network").args(["testnet", "local"]))
)]
struct Args {
    /// Config file (defaults to ~/.redpacket/config.json)
    #[arg(long)]
    config: Option<String>,

    /// Use the testnet deployment
    #[arg(long)]
    testnet: bool,

    /// Use a local deployment (default)
    #[arg(long)]
    local: bool,

    /// Override the ledger gateway URL
    #[arg(long)]
    gateway_url: Option<String>,

    /// Account acting through the wallet
    #[arg(long)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Total packets and the actor's created/claimed counts
    Stats,
    /// One packet with status and claimability
    Show { id: String },
    /// One page of the actor's packets
    List {
        #[arg(long)]
        claimed: bool,
        #[arg(long, default_value_t = 1)]
        page: u64,
    },
    /// Create a packet
    Create {
        #[command(subcommand)]
        kind: CreateKind,
    },
    Claim { id: String },
    Refund { id: String },
    /// Keep the actor's packet page in sync until Ctrl-C
    Watch {
        #[arg(long)]
        claimed: bool,
    },
    /// Read packet ids from stdin and report claimability as they settle
    Check,
    /// Record a ledger deployment for the selected network
    Register {
        ledger: String,
        #[arg(long)]
        label: Option<String>,
    },
}

#[derive(ClapArgs, Debug)]
struct PacketArgs {
    /// Cover image URI (ipfs:// or http)
    #[arg(long, default_value = "")]
    cover: String,

    /// Seconds until expiry (defaults to the configured offset)
    #[arg(long)]
    expires_in: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum CreateKind {
    Native {
        #[arg(long)]
        count: u64,
        /// Total amount in whole units, e.g. 1.5
        #[arg(long)]
        amount: String,
        #[arg(long)]
        random: bool,
        #[command(flatten)]
        packet: PacketArgs,
    },
    Fungible {
        #[arg(long)]
        token: String,
        #[arg(long)]
        count: u64,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        random: bool,
        #[command(flatten)]
        packet: PacketArgs,
    },
    Nft {
        #[arg(long)]
        token: String,
        /// Comma separated item ids, e.g. "1, 2, 3"
        #[arg(long)]
        items: String,
        #[command(flatten)]
        packet: PacketArgs,
    },
}

fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .wrap_err_with(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, "redpacket.log"));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!(e))?;
    Ok(guard)
}

struct Endpoint {
    network: Network,
    gateway_url: String,
    ledger: Option<Address>,
}

fn resolve_endpoint(args: &Args, config: &ClientConfig) -> Result<Endpoint> {
    let network = if args.testnet {
        Network::Testnet
    } else {
        Network::Local
    };
    let latest = LedgerRegistry::open(network).latest()?;
    let gateway_url = args
        .gateway_url
        .clone()
        .or_else(|| config.gateway_url.clone())
        .or_else(|| latest.as_ref().map(|r| r.gateway_url.clone()))
        .or_else(|| {
            (network == Network::Local).then(|| DEFAULT_LOCAL_GATEWAY_URL.to_string())
        })
        .ok_or_else(|| eyre!("No gateway URL for {network}; pass --gateway-url"))?;
    let ledger = config
        .ledger_address
        .or_else(|| latest.as_ref().map(|r| r.ledger_address));
    Ok(Endpoint {
        network,
        gateway_url,
        ledger,
    })
}

fn parse_actor(args: &Args) -> Result<Option<Address>> {
    args.actor
        .as_deref()
        .map(parse_address)
        .transpose()
        .wrap_err("Invalid --actor")
}

fn describe_phase(update: &AttemptUpdate) -> String {
    let phase = match &update.phase {
        Phase::Idle => "idle".to_string(),
        Phase::CheckingApproval => "checking approval".to_string(),
        Phase::AwaitingApprovalSignature => "waiting for approval signature".to_string(),
        Phase::AwaitingApprovalConfirmation { hash } => {
            format!("approval pending {}", short_hex(&format!("{hash:#x}")))
        }
        Phase::AwaitingActionSignature => "waiting for signature".to_string(),
        Phase::AwaitingActionConfirmation { hash } => {
            format!("pending {}", short_hex(&format!("{hash:#x}")))
        }
        Phase::Confirmed { hash } => format!("confirmed {hash:#x}"),
        Phase::Failed(err) => format!("failed: {err}"),
    };
    format!("[{} #{}] {phase}", update.action, update.attempt_id)
}

async fn submit(
    client: &mut RedPacketClient<HttpGateway>,
    updates: &mut mpsc::UnboundedReceiver<AttemptUpdate>,
    action: Action,
) -> Result<()> {
    let attempt = {
        let run = client.submit(action);
        tokio::pin!(run);
        loop {
            tokio::select! {
                attempt = &mut run => break attempt?,
                Some(update) = updates.recv() => println!("{}", describe_phase(&update)),
            }
        }
    };
    while let Ok(update) = updates.try_recv() {
        println!("{}", describe_phase(&update));
    }
    println!("{}", client.status());
    if let Some(created) = client.latest_created() {
        println!("Packet id: {:#x}", created.packet_id);
    }
    if let Some(claimed) = client.latest_claimed() {
        println!("Claimed {} from {:#x}", claimed.amount, claimed.packet_id);
    }
    match attempt.error() {
        Some(err) => Err(eyre!("{err}")),
        None => Ok(()),
    }
}

fn print_page(client: &RedPacketClient<HttpGateway>) {
    let list = client.list();
    println!(
        "{:?} packets, page {}/{} ({} total)",
        list.category(),
        list.page(),
        list.total_pages().max(1),
        list.total()
    );
    for view in client.items() {
        println!("{}", client.describe(view));
    }
}

async fn build_request(
    gateway: &HttpGateway,
    config: &ClientConfig,
    kind: CreateKind,
) -> Result<CreateRequest> {
    let (request, packet) = match kind {
        CreateKind::Native {
            count,
            amount,
            random,
            packet,
        } => {
            let amount = parse_units(&amount, config.native_decimals)?;
            let cover = packet.cover.clone();
            (CreateRequest::native(count, amount, random, cover), packet)
        }
        CreateKind::Fungible {
            token,
            count,
            amount,
            random,
            packet,
        } => {
            let token = parse_address(&token)?;
            let decimals = gateway
                .decimals(&[token])
                .await
                .wrap_err("Failed to read token decimals")?
                .first()
                .copied()
                .ok_or_else(|| eyre!("Token {token:#x} reported no decimals"))?;
            let amount = parse_units(&amount, decimals)?;
            let cover = packet.cover.clone();
            (
                CreateRequest::fungible(token, count, amount, random, cover),
                packet,
            )
        }
        CreateKind::Nft {
            token,
            items,
            packet,
        } => {
            let token = parse_address(&token)?;
            let items = parse_item_ids(&items)?;
            let cover = packet.cover.clone();
            (CreateRequest::non_fungible(token, items, cover), packet)
        }
    };
    let expires_in = packet
        .expires_in
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.default_expiry());
    Ok(request.with_expiry(expires_in))
}

async fn check_from_stdin(gateway: HttpGateway, config: &ClientConfig, actor: Option<Address>) {
    let (input_tx, input_rx) = watch::channel(EligibilityInput {
        raw_id: String::new(),
        actor,
    });
    let (output_tx, mut output_rx) = watch::channel(false);
    let watcher = EligibilityWatcher::new(gateway, config.eligibility_debounce());
    tokio::task::spawn_blocking(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            input_tx.send_modify(|input| input.raw_id = line.trim().to_string());
        }
    });
    let printer = async move {
        while output_rx.changed().await.is_ok() {
            let eligible = *output_rx.borrow_and_update();
            println!("{}", if eligible { "claimable" } else { "not claimable" });
        }
    };
    tokio::join!(watcher.run(input_rx, output_tx), printer);
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let config = ClientConfig::load_from_cli(args.config.as_deref())?;
    let _guard = init_tracing(&config.log_dir())?;
    tracing::info!("starting redpacket client");

    let endpoint = resolve_endpoint(&args, &config)?;
    let actor = parse_actor(&args)?;

    if let Command::Register { ledger, label } = &args.command {
        let ledger = parse_address(ledger)?;
        let record = LedgerRegistry::open(endpoint.network).register(
            ledger,
            endpoint.gateway_url.clone(),
            label.clone(),
        )?;
        println!(
            "Recorded {} ledger {:#x} at {}",
            endpoint.network, record.ledger_address, record.gateway_url
        );
        return Ok(());
    }

    let ledger = endpoint.ledger.ok_or_else(|| {
        eyre!(
            "No ledger address for {}; set ledger_address in the config or run `register`",
            endpoint.network
        )
    })?;
    let gateway = HttpGateway::new(
        endpoint.gateway_url.clone(),
        config.wallet_url.clone(),
        GatewayOptions {
            receipt_poll: config.receipt_poll(),
            confirmation_timeout: config.confirmation_timeout(),
        },
    )?;
    let (updates_tx, mut updates) = mpsc::unbounded_channel();
    let mut client = RedPacketClient::new(gateway.clone(), config.schema(ledger), config.settings())
        .with_updates(updates_tx);
    client.set_actor(actor).await;

    match args.command {
        Command::Stats => println!("{}", client.stats().await),
        Command::Show { id } => match client.show(&id).await? {
            Some(details) => {
                println!("{}", client.describe(&details.view));
                println!("Creator: {:#x}", details.view.packet.creator);
                println!("Variant: {}", details.view.packet.variant);
                println!("Cover: {}", details.cover_url);
                println!(
                    "Claimable: {}",
                    if details.claimable { "yes" } else { "no" }
                );
            }
            None => println!("Packet not found"),
        },
        Command::List { claimed, page } => {
            if claimed {
                client.set_category(ListCategory::Claimed).await;
            }
            client.go_to_page(page).await;
            print_page(&client);
        }
        Command::Create { kind } => {
            let request = build_request(&gateway, &config, kind).await?;
            submit(&mut client, &mut updates, Action::Create(request)).await?;
        }
        Command::Claim { id } => {
            let packet_id = parse_packet_id(&id)?;
            submit(&mut client, &mut updates, Action::Claim(packet_id)).await?;
        }
        Command::Refund { id } => {
            let packet_id = parse_packet_id(&id)?;
            submit(&mut client, &mut updates, Action::Refund(packet_id)).await?;
        }
        Command::Watch { claimed } => {
            if claimed {
                client.set_category(ListCategory::Claimed).await;
            }
            let mut ticker = time::interval(config.poll_interval());
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => { break; }
                    _ = ticker.tick() => {
                        client.refresh().await;
                        print_page(&client);
                    }
                }
            }
        }
        Command::Check => check_from_stdin(gateway, &config, actor).await,
        Command::Register { .. } => {}
    }
    Ok(())
}
