use ember_middle::compiler::callsite::CallSiteFlags;

/// Use count thresholds above which scope accesses go through shared stubs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharingThresholds {
    /// Calls to a fast scope symbol
    pub fast_scope_call: u32,
    /// Calls to a symbol that is not fast scope
    pub slow_scope_call: u32,
    /// Reads of a fast scope symbol
    pub fast_scope_get: u32,
}

impl Default for SharingThresholds {
    fn default() -> Self {
        Self {
            fast_scope_call: 4,
            slow_scope_call: 500,
            fast_scope_get: 200,
        }
    }
}

/// When an all-integer switch is lowered to a dense jump table instead of a lookup table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchPolicy {
    /// Exclusive upper bound on `max - min + 1`
    pub table_range_ceiling: i64,
    /// Minimum ratio of case count to range
    pub min_density: f64,
}

impl Default for SwitchPolicy {
    fn default() -> Self {
        Self {
            table_range_ceiling: 4096,
            min_density: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Compile everything as strict mode code
    pub strict: bool,
    /// Instrumentation flags added to every dynamic call site
    pub call_site_flags: CallSiteFlags,
    /// Estimated weight above which a block is split into sub-units
    pub method_weight_budget: usize,
    /// Estimated weight above which a new unit is started
    pub unit_weight_budget: usize,
    /// Maximum number of literal pool entries per unit
    pub literal_pool_ceiling: usize,
    /// Strings longer than this are stored in the literal pool
    pub large_string_threshold: usize,
    /// Number of non-constant array literal elements stored per array sub-unit
    pub array_split_threshold: usize,
    /// Calls with more arguments than this pass them as a single array
    pub arg_limit: usize,
    pub sharing: SharingThresholds,
    pub switch: SwitchPolicy,
    /// Name prefix of compiled units
    pub unit_prefix: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            strict: false,
            call_site_flags: CallSiteFlags::empty(),
            method_weight_budget: 8 * 1024,
            unit_weight_budget: 32 * 1024,
            literal_pool_ceiling: 2048,
            large_string_threshold: 32 * 1024 / 3,
            array_split_threshold: 1024,
            arg_limit: 250,
            sharing: SharingThresholds::default(),
            switch: SwitchPolicy::default(),
            unit_prefix: String::from("Script"),
        }
    }
}

impl CompilerConfig {
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_call_site_flags(mut self, flags: CallSiteFlags) -> Self {
        self.call_site_flags = flags & CallSiteFlags::INSTRUMENTATION;
        self
    }

    pub fn with_method_weight_budget(mut self, budget: usize) -> Self {
        self.method_weight_budget = budget;
        self
    }

    pub fn with_unit_weight_budget(mut self, budget: usize) -> Self {
        self.unit_weight_budget = budget;
        self
    }

    pub fn with_literal_pool_ceiling(mut self, ceiling: usize) -> Self {
        self.literal_pool_ceiling = ceiling;
        self
    }

    pub fn with_large_string_threshold(mut self, threshold: usize) -> Self {
        self.large_string_threshold = threshold;
        self
    }

    pub fn with_array_split_threshold(mut self, threshold: usize) -> Self {
        self.array_split_threshold = threshold.max(1);
        self
    }

    pub fn with_arg_limit(mut self, limit: usize) -> Self {
        self.arg_limit = limit;
        self
    }

    pub fn with_sharing(mut self, sharing: SharingThresholds) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn with_switch_policy(mut self, policy: SwitchPolicy) -> Self {
        self.switch = policy;
        self
    }
}
