use std::path::PathBuf;

use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use color_eyre::Result;

use shopfloor::api::types::{
  OperationId, OptimizationCriteria, Schedule, WorkCenter, WorkOrder, WorkOrderFilter,
  WorkOrderId, WorkOrderStatus,
};
use shopfloor::config::Config;
use shopfloor::dashboard::Dashboard;
use shopfloor::logging;
use shopfloor::mutation::schedule::{DropOutcome, ReorderOutcome};

#[derive(Parser, Debug)]
#[command(name = "shopfloor")]
#[command(about = "Work orders, work centers and schedules from the production API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shopfloor/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Production API base url, overrides the config file and SHOPFLOOR_API_URL
  #[arg(long)]
  api_url: Option<String>,

  /// Mirror logs to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List work orders
  WorkOrders {
    #[arg(long)]
    status: Option<WorkOrderStatus>,
    #[arg(long)]
    work_center: Option<String>,
    /// Only priority 1 orders
    #[arg(long)]
    urgent: bool,
    /// Match rn, product code or product name
    #[arg(long)]
    search: Option<String>,
  },
  /// Change a single work order
  WorkOrder {
    #[command(subcommand)]
    action: WorkOrderCommand,
  },
  /// List work centers with their metrics
  Machines,
  /// Change a single work center
  Machine {
    #[command(subcommand)]
    action: MachineCommand,
  },
  /// Show or change a work center's schedule
  #[command(args_conflicts_with_subcommands = true)]
  Schedule {
    /// Work center code (default from config)
    work_center: Option<String>,
    #[command(subcommand)]
    action: Option<ScheduleCommand>,
  },
  /// Work order counts and recent activity
  Summary,
  /// Print every update of a schedule until Ctrl-C
  Watch { work_center: Option<String> },
}

#[derive(Subcommand, Debug)]
enum WorkOrderCommand {
  SetStatus { id: WorkOrderId, status: WorkOrderStatus },
  Delete { id: WorkOrderId },
}

#[derive(Subcommand, Debug)]
enum MachineCommand {
  SetActive {
    code: String,
    #[arg(action = ArgAction::Set)]
    active: bool,
  },
}

#[derive(Subcommand, Debug)]
enum ScheduleCommand {
  /// Drop operation `id` onto operation `over`
  Move {
    work_center: String,
    id: OperationId,
    over: OperationId,
  },
  /// Let the server re-sequence one work center, or all of them
  Optimize {
    criteria: OptimizationCriteria,
    work_center: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = logging::init(args.verbose)?;

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(url) = args.api_url {
    config.api.url = url;
  }

  let dashboard = Dashboard::init(config)?;
  let result = run(&dashboard, args.command).await;
  dashboard.teardown();
  result
}

async fn run(dashboard: &Dashboard, command: Command) -> Result<()> {
  let default_wc = dashboard.config().default_work_center.clone();
  match command {
    Command::WorkOrders {
      status,
      work_center,
      urgent,
      search,
    } => {
      let filter = WorkOrderFilter {
        work_center,
        status,
        urgent_only: urgent,
      };
      let mut query = dashboard.work_orders(filter);
      let orders = query.settled().await?;
      let matching = orders
        .iter()
        .filter(|o| search.as_deref().map_or(true, |term| o.matches_search(term)));
      for order in matching {
        print_work_order(order);
      }
    }
    Command::WorkOrder { action } => match action {
      WorkOrderCommand::SetStatus { id, status } => {
        match dashboard.set_work_order_status(id, status).await? {
          Some(order) => print_work_order(&order),
          None => println!("work order {} is now {}", id, status),
        }
      }
      WorkOrderCommand::Delete { id } => {
        dashboard.delete_work_order(id).await?;
        println!("work order {} deleted", id);
      }
    },
    Command::Machines => {
      let mut machines = dashboard.machines();
      let machines = machines.settled().await?.clone();
      // Metrics come from cached schedules; start all reads before awaiting
      let mut schedules = Vec::new();
      for machine in &machines {
        schedules.push(dashboard.schedule(&machine.code)?);
      }
      for schedule in &mut schedules {
        // A machine without a schedule simply has no metrics
        let _ = schedule.settled().await;
      }
      for machine in &machines {
        print_machine(dashboard, machine);
      }
    }
    Command::Machine {
      action: MachineCommand::SetActive { code, active },
    } => match dashboard.set_machine_active(&code, active).await? {
      Some(machine) => print_machine(dashboard, &machine),
      None => println!(
        "{} is now {}",
        code,
        if active { "active" } else { "inactive" }
      ),
    },
    Command::Schedule {
      work_center,
      action: None,
    } => {
      let work_center = work_center.unwrap_or(default_wc);
      let mut query = dashboard.schedule(&work_center)?;
      print_schedule(query.settled().await?);
    }
    Command::Schedule {
      action: Some(ScheduleCommand::Move {
        work_center,
        id,
        over,
      }),
      ..
    } => {
      let mut query = dashboard.schedule(&work_center)?;
      query.settled().await?;
      let drop = DropOutcome {
        active: id,
        over: Some(over),
      };
      match dashboard.move_operation(&work_center, drop).await? {
        ReorderOutcome::Unchanged => println!("schedule unchanged"),
        ReorderOutcome::Reordered(ack) => {
          println!("{} reordered: {:?}", ack.work_center, ack.sequence)
        }
      }
    }
    Command::Schedule {
      action: Some(ScheduleCommand::Optimize {
        criteria,
        work_center,
      }),
      ..
    } => {
      let optimized = dashboard.optimize(criteria, work_center).await?;
      let scope = optimized.work_center.as_deref().unwrap_or("all work centers");
      println!(
        "optimized {} by {}: {} operations",
        scope,
        criteria,
        optimized.items.len()
      );
    }
    Command::Summary => {
      let summary = dashboard.summary(Utc::now().date_naive()).await?;
      println!("in progress      {}", summary.in_progress);
      println!("pending          {}", summary.pending);
      println!("completed today  {}", summary.completed_today);
      println!("urgent           {}", summary.urgent);
      println!("completion rate  {}%", summary.completion_rate);
      println!();
      for order in &summary.recent {
        print_work_order(order);
      }
    }
    Command::Watch { work_center } => {
      let work_center = work_center.unwrap_or(default_wc);
      let mut query = dashboard.schedule(&work_center)?;
      loop {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => break,
          changed = query.changed() => {
            if !changed {
              break;
            }
            if let Some(schedule) = query.data() {
              println!("-- {} at {}", work_center, Utc::now().format("%H:%M:%S"));
              print_schedule(schedule);
            } else if let Some(err) = query.error() {
              eprintln!("{}: {}", work_center, err);
            }
          }
        }
      }
    }
  }
  Ok(())
}

fn print_work_order(order: &WorkOrder) {
  let delivery = order
    .delivery_date
    .map(|d| d.to_string())
    .unwrap_or_else(|| "-".to_string());
  println!(
    "{:>6}  {:<12} {:<11} {}  {:<10} {:>6}  {}",
    order.id,
    order.rn,
    order.status.as_str(),
    order.priority_level,
    delivery,
    order.quantity,
    order.product_name
  );
}

fn print_machine(dashboard: &Dashboard, machine: &WorkCenter) {
  let metrics = dashboard.machine_metrics(machine);
  println!(
    "{:<8} {:<24} {:<8} {:>5}h/day  ops {:>4}  util {:>6}%",
    machine.code,
    machine.name,
    if machine.is_active { "active" } else { "inactive" },
    machine.capacity_hours_per_day,
    metrics.operations.to_string(),
    metrics.utilization_percent.to_string()
  );
}

fn print_schedule(schedule: &Schedule) {
  println!("{} ({} operations)", schedule.work_center, schedule.len());
  for item in &schedule.items {
    let minutes = item
      .standard_minutes
      .map(|m| format!("{:.0} min", m))
      .unwrap_or_default();
    println!(
      "{:>3}. {:>6}  {:<12} {:<20} {}",
      item.position + 1,
      item.id,
      item.work_order_rn,
      item.operation,
      minutes
    );
  }
}
