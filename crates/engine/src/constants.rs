use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

pub const SCORE_MIN: Decimal = dec!(0);
pub const SCORE_MAX: Decimal = dec!(100);

/// Confluence score at or above which a result "meets minimum".
pub const CONFLUENCE_MINIMUM: Decimal = dec!(80);

/// Tolerance on the sum of confluence weights.
pub const WEIGHT_SUM_TOLERANCE: Decimal = dec!(0.001);

/// Score a validation layer needs to pass.
pub const LAYER_PASS_SCORE: Decimal = dec!(50);

// ---------------------------------------------------------------------------
// Default confluence weights (sum = 1.0)
// ---------------------------------------------------------------------------

pub const WEIGHT_SMC: Decimal = dec!(0.20);
pub const WEIGHT_TECHNICAL: Decimal = dec!(0.15);
pub const WEIGHT_WYCKOFF: Decimal = dec!(0.10);
pub const WEIGHT_ELLIOTT: Decimal = dec!(0.08);
pub const WEIGHT_VSA: Decimal = dec!(0.08);
pub const WEIGHT_MARKET_PROFILE: Decimal = dec!(0.08);
pub const WEIGHT_ORDER_FLOW: Decimal = dec!(0.08);
pub const WEIGHT_INTERMARKET: Decimal = dec!(0.08);
pub const WEIGHT_FUNDAMENTAL: Decimal = dec!(0.08);
pub const WEIGHT_SENTIMENT: Decimal = dec!(0.07);

// ---------------------------------------------------------------------------
// Direction vote weights (signal generator)
// ---------------------------------------------------------------------------

pub const VOTE_WEIGHT_SMC: Decimal = dec!(0.30);
pub const VOTE_WEIGHT_TECHNICAL: Decimal = dec!(0.25);
pub const VOTE_WEIGHT_WYCKOFF: Decimal = dec!(0.20);
pub const VOTE_WEIGHT_AI: Decimal = dec!(0.25);

/// Net vote magnitude below which no direction is proposed.
pub const VOTE_DEADBAND: Decimal = dec!(0.15);

// ---------------------------------------------------------------------------
// AI ensemble blend
// ---------------------------------------------------------------------------

pub const AI_BLEND_PATTERN: Decimal = dec!(0.25);
pub const AI_BLEND_REGIME: Decimal = dec!(0.20);
pub const AI_BLEND_PROBABILITY: Decimal = dec!(0.30);
pub const AI_BLEND_PREDICTION: Decimal = dec!(0.25);

/// Analyzer biases that must agree for the majority-vote prediction.
pub const AI_MIN_AGREEING_BIASES: usize = 3;

// ---------------------------------------------------------------------------
// Risk defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_RISK_PERCENT: Decimal = dec!(1.0);
pub const MAX_RISK_PERCENT: Decimal = dec!(2.0);
pub const DEFAULT_ATR_SL_MULTIPLIER: Decimal = dec!(1.5);
pub const DEFAULT_TP_RATIOS: [Decimal; 3] = [dec!(1.5), dec!(2.5), dec!(4.0)];
pub const DEFAULT_PARTIAL_CLOSES: [Decimal; 3] = [dec!(40), dec!(40), dec!(20)];
pub const MIN_REWARD_RATIO: Decimal = dec!(2.5);

// ---------------------------------------------------------------------------
// Fibonacci
// ---------------------------------------------------------------------------

pub const FIB_RETRACEMENTS: [Decimal; 7] = [
    dec!(0),
    dec!(0.236),
    dec!(0.382),
    dec!(0.5),
    dec!(0.618),
    dec!(0.786),
    dec!(1),
];

pub const FIB_EXTENSIONS: [Decimal; 7] = [
    dec!(1),
    dec!(1.272),
    dec!(1.414),
    dec!(1.618),
    dec!(2),
    dec!(2.618),
    dec!(3.618),
];

pub const GOLDEN_ZONE_LOW: Decimal = dec!(0.618);
pub const GOLDEN_ZONE_HIGH: Decimal = dec!(0.786);

// ---------------------------------------------------------------------------
// Market profile
// ---------------------------------------------------------------------------

/// Share of total profile volume enclosed by the value area.
pub const VALUE_AREA_SHARE: f64 = 0.70;

// ---------------------------------------------------------------------------
// SMC premium/discount thresholds (fraction of lookback range)
// ---------------------------------------------------------------------------

pub const PREMIUM_THRESHOLD: Decimal = dec!(0.70);
pub const DISCOUNT_THRESHOLD: Decimal = dec!(0.30);

// ---------------------------------------------------------------------------
// Kill zones (UTC hours, end-exclusive)
// ---------------------------------------------------------------------------

pub const ASIAN_SESSION_HOURS: (u32, u32) = (0, 3);
pub const LONDON_SESSION_HOURS: (u32, u32) = (7, 10);
pub const NEW_YORK_SESSION_HOURS: (u32, u32) = (12, 15);
pub const LONDON_CLOSE_HOURS: (u32, u32) = (15, 17);
pub const KILL_ZONE_PENALTY: Decimal = dec!(15);

// ---------------------------------------------------------------------------
// Engine defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_MIN_CONFLUENCE: Decimal = dec!(80);
pub const DEFAULT_MIN_AI_CONFIDENCE: Decimal = dec!(70);
pub const DEFAULT_MIN_LAYERS: usize = 8;
pub const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SIGNAL_EXPIRY_HOURS: i64 = 24;

/// Bars most analyzers need on the primary timeframe.
pub const DEFAULT_MIN_BARS: usize = 50;

/// Bars the technical analyzer needs (200-period EMA).
pub const TECHNICAL_MIN_BARS: usize = 200;
