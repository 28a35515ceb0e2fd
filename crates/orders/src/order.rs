use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mealflow_core::{Aggregate, AggregateRoot, DomainError, TenantId, UserId, typed_id};
use mealflow_events::Event;
use mealflow_inventory::StockDeltas;
use mealflow_menu::ProductId;

use crate::{OrderStatus, OrderType, StockEffect};

typed_id!(
    /// Order identifier (tenant-scoped via `tenant_id` fields in events/commands).
    OrderId
);

/// Order line: product, quantity, snapshotted unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u64,
    /// Price in smallest currency unit (e.g., cents), captured at checkout.
    pub unit_price: u64,
    /// Stock deltas applied for this line (all non-positive).
    #[serde(default)]
    pub consumption: StockDeltas,
}

impl OrderItem {
    pub fn new(product_id: ProductId, quantity: u64, unit_price: u64) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
            consumption: StockDeltas::new(),
        }
    }

    pub fn with_consumption(mut self, consumption: StockDeltas) -> Self {
        self.consumption = consumption;
        self
    }

    pub fn line_total(&self) -> u64 {
        self.unit_price.saturating_mul(self.quantity)
    }

    fn checked_line_total(&self) -> Option<u64> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// One status-history entry. Placement is recorded with `previous: None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub previous: Option<OrderStatus>,
    pub new: OrderStatus,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Cut `notes` to at most `max_chars` characters.
pub fn truncate_notes(notes: &str, max_chars: usize) -> String {
    notes.chars().take(max_chars).collect()
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    tenant_id: Option<TenantId>,
    client_id: Option<UserId>,
    number: u64,
    status: OrderStatus,
    order_type: OrderType,
    notes: String,
    items: Vec<OrderItem>,
    total_amount: u64,
    /// Net stock deltas applied on behalf of this order and not yet given back.
    consumed: StockDeltas,
    history: Vec<StatusRecord>,
    created_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    last_modified_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            client_id: None,
            number: 0,
            status: OrderStatus::New,
            order_type: OrderType::default(),
            notes: String::new(),
            items: Vec::new(),
            total_amount: 0,
            consumed: StockDeltas::new(),
            history: Vec::new(),
            created_at: None,
            completed_at: None,
            last_modified_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn client_id(&self) -> Option<UserId> {
        self.client_id
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn item(&self, product_id: ProductId) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    pub fn total_amount(&self) -> u64 {
        self.total_amount
    }

    pub fn consumed(&self) -> &StockDeltas {
        &self.consumed
    }

    pub fn status_history(&self) -> &[StatusRecord] {
        &self.history
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn last_modified_at(&self) -> Option<DateTime<Utc>> {
        self.last_modified_at
    }

    fn recompute_total(&mut self) {
        self.total_amount = self
            .items
            .iter()
            .fold(0u64, |acc, i| acc.saturating_add(i.line_total()));
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder. Each item carries the consumption staged for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub client_id: UserId,
    pub number: u64,
    pub order_type: OrderType,
    pub notes: String,
    pub items: Vec<OrderItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem (only while `NEW`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub item: OrderItem,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeItemQuantity (only while `NEW`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeItemQuantity {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u64,
    /// Consumption of the line at the new quantity.
    pub consumption: StockDeltas,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem (only while `NEW`, never the last item).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub to: OrderStatus,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    AddItem(AddItem),
    ChangeItemQuantity(ChangeItemQuantity),
    RemoveItem(RemoveItem),
    ChangeStatus(ChangeStatus),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub client_id: UserId,
    pub number: u64,
    pub order_type: OrderType,
    pub notes: String,
    pub items: Vec<OrderItem>,
    pub consumption: StockDeltas,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub item: OrderItem,
    pub stock_change: StockDeltas,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemQuantityChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuantityChanged {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub previous_quantity: u64,
    pub quantity: u64,
    pub consumption: StockDeltas,
    pub stock_change: StockDeltas,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub stock_change: StockDeltas,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged. `stock_change` is non-empty only for edges that
/// restock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub previous: OrderStatus,
    pub new: OrderStatus,
    pub stock_change: StockDeltas,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    ItemAdded(ItemAdded),
    ItemQuantityChanged(ItemQuantityChanged),
    ItemRemoved(ItemRemoved),
    StatusChanged(StatusChanged),
}

impl OrderEvent {
    /// Stock deltas this event applies through the ledger.
    pub fn stock_change(&self) -> &StockDeltas {
        match self {
            OrderEvent::OrderPlaced(e) => &e.consumption,
            OrderEvent::ItemAdded(e) => &e.stock_change,
            OrderEvent::ItemQuantityChanged(e) => &e.stock_change,
            OrderEvent::ItemRemoved(e) => &e.stock_change,
            OrderEvent::StatusChanged(e) => &e.stock_change,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        match self {
            OrderEvent::OrderPlaced(e) => e.tenant_id,
            OrderEvent::ItemAdded(e) => e.tenant_id,
            OrderEvent::ItemQuantityChanged(e) => e.tenant_id,
            OrderEvent::ItemRemoved(e) => e.tenant_id,
            OrderEvent::StatusChanged(e) => e.tenant_id,
        }
    }
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::ItemAdded(_) => "orders.order.item_added",
            OrderEvent::ItemQuantityChanged(_) => "orders.order.item_quantity_changed",
            OrderEvent::ItemRemoved(_) => "orders.order.item_removed",
            OrderEvent::StatusChanged(_) => "orders.order.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::ItemAdded(e) => e.occurred_at,
            OrderEvent::ItemQuantityChanged(e) => e.occurred_at,
            OrderEvent::ItemRemoved(e) => e.occurred_at,
            OrderEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.client_id = Some(e.client_id);
                self.number = e.number;
                self.status = OrderStatus::New;
                self.order_type = e.order_type;
                self.notes = e.notes.clone();
                self.items = e.items.clone();
                self.consumed = e.consumption.clone();
                self.history = vec![StatusRecord {
                    previous: None,
                    new: OrderStatus::New,
                    actor: e.client_id,
                    occurred_at: e.occurred_at,
                }];
                self.created_at = Some(e.occurred_at);
                self.completed_at = None;
                self.created = true;
            }
            OrderEvent::ItemAdded(e) => {
                self.items.push(e.item.clone());
                self.consumed.merge(&e.stock_change);
            }
            OrderEvent::ItemQuantityChanged(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.product_id == e.product_id) {
                    item.quantity = e.quantity;
                    item.consumption = e.consumption.clone();
                }
                self.consumed.merge(&e.stock_change);
            }
            OrderEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.product_id != e.product_id);
                self.consumed.merge(&e.stock_change);
            }
            OrderEvent::StatusChanged(e) => {
                self.status = e.new;
                if e.new == OrderStatus::Done {
                    self.completed_at = Some(e.occurred_at);
                }
                self.consumed.merge(&e.stock_change);
                self.history.push(StatusRecord {
                    previous: Some(e.previous),
                    new: e.new,
                    actor: e.actor,
                    occurred_at: e.occurred_at,
                });
            }
        }

        self.recompute_total();
        self.last_modified_at = Some(event.occurred_at());

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::AddItem(cmd) => self.handle_add_item(cmd),
            OrderCommand::ChangeItemQuantity(cmd) => self.handle_change_quantity(cmd),
            OrderCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            OrderCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

impl Order {
    fn ensure_created(&self, tenant_id: TenantId, order_id: OrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_items_editable(&self) -> Result<(), DomainError> {
        if !self.status.allows_item_changes() {
            return Err(DomainError::invariant(format!(
                "order items can only change while NEW (status: {})",
                self.status
            )));
        }
        Ok(())
    }

    fn ensure_total_fits<'a>(
        mut items: impl Iterator<Item = &'a OrderItem>,
    ) -> Result<(), DomainError> {
        items
            .try_fold(0u64, |acc, i| i.checked_line_total().and_then(|t| acc.checked_add(t)))
            .map(|_| ())
            .ok_or_else(|| DomainError::validation("order total overflows"))
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::EmptyCart);
        }
        if cmd.items.iter().any(|i| i.quantity == 0) {
            return Err(DomainError::validation("quantity must be positive"));
        }
        for (idx, item) in cmd.items.iter().enumerate() {
            if cmd.items[..idx].iter().any(|p| p.product_id == item.product_id) {
                return Err(DomainError::validation(format!(
                    "product {} appears twice",
                    item.product_id
                )));
            }
        }
        if cmd.items.iter().any(|i| !i.consumption.all_non_positive()) {
            return Err(DomainError::invariant("checkout consumption must not restock"));
        }
        Self::ensure_total_fits(cmd.items.iter())?;

        let mut consumption = StockDeltas::new();
        for item in &cmd.items {
            consumption.merge(&item.consumption);
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            client_id: cmd.client_id,
            number: cmd.number,
            order_type: cmd.order_type,
            notes: cmd.notes.clone(),
            items: cmd.items.clone(),
            consumption,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created(cmd.tenant_id, cmd.order_id)?;
        self.ensure_items_editable()?;

        if cmd.item.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if !cmd.item.consumption.all_non_positive() {
            return Err(DomainError::invariant("adding an item must not restock"));
        }
        if self.item(cmd.item.product_id).is_some() {
            return Err(DomainError::validation(format!(
                "product {} is already on the order",
                cmd.item.product_id
            )));
        }
        Self::ensure_total_fits(self.items.iter().chain(core::iter::once(&cmd.item)))?;

        Ok(vec![OrderEvent::ItemAdded(ItemAdded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            item: cmd.item.clone(),
            stock_change: cmd.item.consumption.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_quantity(
        &self,
        cmd: &ChangeItemQuantity,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created(cmd.tenant_id, cmd.order_id)?;
        self.ensure_items_editable()?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        let Some(current) = self.item(cmd.product_id) else {
            return Err(DomainError::not_found());
        };
        if current.quantity == cmd.quantity {
            return Ok(vec![]);
        }
        if !cmd.consumption.all_non_positive() {
            return Err(DomainError::invariant("line consumption must be non-positive"));
        }
        let edited = OrderItem {
            quantity: cmd.quantity,
            consumption: cmd.consumption.clone(),
            ..current.clone()
        };
        Self::ensure_total_fits(
            self.items
                .iter()
                .filter(|i| i.product_id != cmd.product_id)
                .chain(core::iter::once(&edited)),
        )?;

        Ok(vec![OrderEvent::ItemQuantityChanged(ItemQuantityChanged {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            product_id: cmd.product_id,
            previous_quantity: current.quantity,
            quantity: cmd.quantity,
            consumption: cmd.consumption.clone(),
            stock_change: cmd.consumption.difference(&current.consumption),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created(cmd.tenant_id, cmd.order_id)?;
        self.ensure_items_editable()?;

        let Some(current) = self.item(cmd.product_id) else {
            return Err(DomainError::not_found());
        };
        if self.items.len() == 1 {
            return Err(DomainError::validation(
                "cannot remove the last item; cancel the order instead",
            ));
        }

        Ok(vec![OrderEvent::ItemRemoved(ItemRemoved {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            product_id: cmd.product_id,
            stock_change: current.consumption.negated(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created(cmd.tenant_id, cmd.order_id)?;

        let stock_change = match self.status.transition(cmd.to)? {
            StockEffect::None => StockDeltas::new(),
            StockEffect::RestockConsumed => self.consumed.negated(),
        };

        Ok(vec![OrderEvent::StatusChanged(StatusChanged {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            previous: self.status,
            new: cmd.to,
            stock_change,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}
