/// How a flow variable moves between packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarOp {
    /// Step forward through `[min, max]`, wrapping at the top.
    Inc,
    /// Step backward through `[min, max]`, wrapping at the bottom.
    Dec,
    /// Draw uniformly from `[min, max]` on every update.
    Random,
}

/// Width of a flow variable and of its on-wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSize {
    U8,
    U16,
    U32,
    U64,
}

impl ValueSize {
    /// Number of bytes the value occupies in the packet.
    pub const fn bytes(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }

    /// Largest value representable at this size.
    pub const fn max_value(&self) -> u64 {
        match self {
            Self::U8 => u8::MAX as u64,
            Self::U16 => u16::MAX as u64,
            Self::U32 => u32::MAX as u64,
            Self::U64 => u64::MAX,
        }
    }
}

/// Byte order used when a value is written into the packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Endianness {
    /// Network byte order.
    #[default]
    Big,
    Little,
}

/// Declares a flow variable and the update applied to it between packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowVar {
    /// Name the variable is referenced by in [`WriteField`] instructions.
    pub name: String,
    pub size: ValueSize,
    pub op: VarOp,
    /// Value of the first update. Must lie within `[min, max]`.
    pub init: u64,
    pub min: u64,
    pub max: u64,
    /// Distance moved per update for `Inc`/`Dec`. Ignored by `Random`.
    pub step: u64,
}

impl FlowVar {
    pub fn new(
        name: impl Into<String>,
        size: ValueSize,
        op: VarOp,
        init: u64,
        min: u64,
        max: u64,
    ) -> Self {
        Self { name: name.into(), size, op, init, min, max, step: 1 }
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    /// Number of distinct values the variable can take.
    pub fn range(&self) -> u64 {
        self.max.wrapping_sub(self.min).wrapping_add(1)
    }

    /// Whether the variable's value sequence can be partitioned by
    /// phase/stride without changing aggregate statistics. Random draws
    /// have no sequence to partition.
    pub fn is_split_safe(&self) -> bool {
        self.op != VarOp::Random
    }
}

/// Writes a variable's current value into the outgoing packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteField {
    /// Name of the [`FlowVar`] supplying the value.
    pub var: String,
    /// Byte offset in the packet buffer.
    pub pkt_offset: u16,
    /// Added to the value just before it is written.
    pub add_value: i64,
    pub endianness: Endianness,
}

impl WriteField {
    pub fn new(var: impl Into<String>, pkt_offset: u16) -> Self {
        Self { var: var.into(), pkt_offset, add_value: 0, endianness: Endianness::Big }
    }

    pub fn with_add_value(mut self, add_value: i64) -> Self {
        self.add_value = add_value;
        self
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }
}

/// One step of a packet-mutation program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Var(FlowVar),
    Write(WriteField),
}

impl Instruction {
    /// The variable name this instruction declares, if any.
    pub fn declared_name(&self) -> Option<&str> {
        match self {
            Self::Var(v) => Some(&v.name),
            Self::Write(_) => None,
        }
    }
}

impl From<FlowVar> for Instruction {
    fn from(v: FlowVar) -> Self {
        Self::Var(v)
    }
}

impl From<WriteField> for Instruction {
    fn from(w: WriteField) -> Self {
        Self::Write(w)
    }
}
