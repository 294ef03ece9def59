use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::functions::{
    json_schema_for, FunctionDefinition, FunctionParameter, FunctionRegistry, KernelFunction,
};
use crate::orders::OrderStore;
use crate::LLMError;

pub const ORDER_TRACKER: &str = "order_tracker";
pub const ISSUE_RESOLVER: &str = "issue_resolver";

/// Redirect returned when the resolver is asked to handle a tracking
/// request: tracking and resolution are disjoint concerns.
pub const TRACKING_REDIRECT: &str = "Tracking requests are handled by the order tracker tool. \
     Please use 'order_tracker' to fetch status/ETA.";

/// Rejection returned by the late-delivery branch until the details carry a
/// confirmation marker. This is the one hard, program-level phase gate.
pub const CONFIRMATION_REQUIRED: &str = "Confirmation required before issuing credits for late delivery. \
     Ask the user to confirm the delay first (Phase 1), then call 'issue_resolver' again \
     with details including 'confirmed' to proceed.";

const CONFIRMATION_MARKER: &str = "confirm";

/// Internal resolution categories. External scenario labels are folded into
/// these through the alias table; anything unrecognized stays `Other` and
/// takes the generic logged-and-escalated branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    MissingItems,
    PoorQuality,
    PaymentIssue,
    WrongOrder,
    AddressError,
    ColdFood,
    LateDelivery,
    Tracking,
    Other(String),
}

impl IssueKind {
    /// Normalizes a raw issue type: scenario labels (any casing) map through
    /// the alias table, internal snake_case names pass through, and TRACK is
    /// kept distinct so the resolver can refuse it outright.
    pub fn from_raw(raw: &str) -> Self {
        let normalized = raw.trim().to_uppercase();
        match normalized.as_str() {
            "LATE" => return Self::LateDelivery,
            "QUALITY" => return Self::PoorQuality,
            "MISS" => return Self::MissingItems,
            "WRONG" => return Self::WrongOrder,
            "PAYMENT" => return Self::PaymentIssue,
            "ADDRESS" => return Self::AddressError,
            "COLD" => return Self::ColdFood,
            "TRACK" => return Self::Tracking,
            _ => {}
        }

        match raw.trim().to_lowercase().as_str() {
            "missing_items" => Self::MissingItems,
            "poor_quality" => Self::PoorQuality,
            "payment_issue" => Self::PaymentIssue,
            "wrong_order" => Self::WrongOrder,
            "address_error" => Self::AddressError,
            "cold_food" => Self::ColdFood,
            "late_delivery" => Self::LateDelivery,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TrackerArgs {
    order_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ResolverArgs {
    order_id: String,
    issue_type: String,
    #[serde(default)]
    details: String,
    #[serde(default)]
    missing_items: String,
    #[serde(default)]
    refund_amount: String,
}

/// Read-only status lookup. Unknown ids produce an explicit not-found
/// string, never an error the model has to cope with; an already-resolved
/// order surfaces its note so the agent cannot contradict it.
pub struct OrderTrackerTool {
    store: Arc<OrderStore>,
}

impl OrderTrackerTool {
    pub fn new(store: Arc<OrderStore>) -> Self {
        Self { store }
    }

    fn status_text(&self, order_id: &str) -> Result<String, LLMError> {
        let Some(order) = self.store.get_order(order_id)? else {
            return Ok(format!("Error: Order ID {order_id} not found."));
        };

        if let Some(note) = &order.resolution_note {
            return Ok(format!(
                "Status for order {order_id} is '{}'. Issue already resolved: {note}",
                order.status
            ));
        }

        let mut details = format!("Order {order_id} status is '{}'.", order.status);
        if let Some(eta) = &order.eta {
            details.push_str(&format!(" ETA: {eta}."));
        }
        Ok(details)
    }
}

#[async_trait]
impl KernelFunction for OrderTrackerTool {
    fn definition(&self) -> FunctionDefinition {
        let mut definition = FunctionDefinition::new(ORDER_TRACKER).with_description(
            "Use this tool to get the real-time status of a user's food order. \
             Use it in Phase 1 to report status/items/ETA and ask for confirmation.",
        );
        definition.add_parameter(
            FunctionParameter::new("order_id", json_schema_for::<String>())
                .with_description("The unique identifier for a customer's order."),
        );
        definition
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: TrackerArgs = serde_json::from_value(arguments.clone())
            .map_err(|error| LLMError::InvalidFunctionArguments(error.to_string()))?;
        debug!(order_id = %args.order_id, "order_tracker invoked");
        Ok(Value::String(self.status_text(&args.order_id)?))
    }
}

/// Side-effecting issue resolution. Pure dispatch over the normalized issue
/// kind; the only mutation is the resolution-note write on success.
pub struct IssueResolverTool {
    store: Arc<OrderStore>,
}

impl IssueResolverTool {
    pub fn new(store: Arc<OrderStore>) -> Self {
        Self { store }
    }

    fn resolve(&self, args: &ResolverArgs) -> Result<String, LLMError> {
        let kind = IssueKind::from_raw(&args.issue_type);

        if kind == IssueKind::Tracking {
            return Ok(TRACKING_REDIRECT.to_string());
        }

        if kind == IssueKind::LateDelivery
            && !args.details.to_lowercase().contains(CONFIRMATION_MARKER)
        {
            return Ok(CONFIRMATION_REQUIRED.to_string());
        }

        debug!(order_id = %args.order_id, ?kind, "issue_resolver invoked");
        let resolution = resolution_for(&kind, args);

        self.store.set_resolution(&args.order_id, &resolution)?;
        Ok(format!(
            "I have processed your request for order {}. The resolution is: {resolution}",
            args.order_id
        ))
    }
}

/// The canned resolution sentence for a normalized issue kind, with the
/// caller-supplied details interpolated. Each branch is a pure function of
/// its inputs.
fn resolution_for(kind: &IssueKind, args: &ResolverArgs) -> String {
    match kind {
        IssueKind::MissingItems => {
            let items_info = [&args.missing_items, &args.details]
                .into_iter()
                .find(|value| !value.is_empty())
                .map(String::as_str)
                .unwrap_or("the missing item");
            format!("a partial refund for {items_info} has been issued.")
        }
        IssueKind::PoorQuality => {
            if args.refund_amount.is_empty() {
                "a full refund for the affected item has been credited to your account."
                    .to_string()
            } else {
                format!(
                    "a full refund of {} has been credited to your account for the quality issue.",
                    args.refund_amount
                )
            }
        }
        IssueKind::PaymentIssue => "the billing issue has been escalated for immediate \
             investigation. Our team will follow up via email within 24 hours."
            .to_string(),
        IssueKind::WrongOrder => {
            let details = args.details.to_lowercase();
            if details.contains("reship") || details.contains("replacement") {
                "a replacement for the correct order has been prepared and is on its way."
                    .to_string()
            } else if details.contains("refund") {
                "a full refund has been issued for the incorrect order.".to_string()
            } else {
                "the issue has been logged and we will either reship the correct order \
                 or issue a refund shortly."
                    .to_string()
            }
        }
        IssueKind::AddressError => format!(
            "the delivery address has been updated and the driver rerouted. \
             The new ETA will appear in your app. Details: {}",
            args.details
        ),
        IssueKind::ColdFood => "a formal service complaint has been logged with our delivery \
             operations team to ensure this doesn't happen again. We take this feedback very \
             seriously."
            .to_string(),
        IssueKind::LateDelivery => "delivery credits have been added to your account for the \
             inconvenience. We apologize for the delay."
            .to_string(),
        IssueKind::Tracking => TRACKING_REDIRECT.to_string(),
        IssueKind::Other(_) => format!(
            "your issue ('{}') has been logged and escalated for review.",
            args.details
        ),
    }
}

#[async_trait]
impl KernelFunction for IssueResolverTool {
    fn definition(&self) -> FunctionDefinition {
        let mut definition = FunctionDefinition::new(ISSUE_RESOLVER).with_description(
            "Use this tool to log and resolve a user's issue with an order. \
             Only call this in Phase 2 after the user confirms the details. \
             For late deliveries, include 'confirmed' in the details when calling this tool.",
        );
        definition.add_parameter(
            FunctionParameter::new("order_id", json_schema_for::<String>())
                .with_description("The unique identifier for the order with an issue."),
        );
        definition.add_parameter(
            FunctionParameter::new("issue_type", json_schema_for::<String>())
                .with_description("The type of issue. E.g., 'missing_items', 'poor_quality'."),
        );
        definition.add_parameter(
            FunctionParameter::new("details", json_schema_for::<String>())
                .with_description("A description of the issue.")
                .optional(),
        );
        definition.add_parameter(
            FunctionParameter::new("missing_items", json_schema_for::<String>())
                .with_description("Specific items that are missing, if applicable.")
                .optional(),
        );
        definition.add_parameter(
            FunctionParameter::new("refund_amount", json_schema_for::<String>())
                .with_description("The amount to refund, if applicable.")
                .optional(),
        );
        definition
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, LLMError> {
        let args: ResolverArgs = serde_json::from_value(arguments.clone())
            .map_err(|error| LLMError::InvalidFunctionArguments(error.to_string()))?;
        Ok(Value::String(self.resolve(&args)?))
    }
}

/// Registers both support tools bound to the given order store.
pub fn register_support_tools(registry: &mut FunctionRegistry, store: Arc<OrderStore>) {
    registry.register(Arc::new(OrderTrackerTool::new(store.clone())));
    registry.register(Arc::new(IssueResolverTool::new(store)));
}
