use sqlite::Value;
use std::iter::repeat_n;

use super::statement::number_placeholders;

/// Internal Boolean representation
#[derive(Debug, Clone)]
enum BooleanCondition {
    /// Empty tree
    None,

    /// Single boolean expression
    Expression(String),

    /// And branch
    And(Box<BooleanCondition>, Box<BooleanCondition>),

    /// Or branch
    Or(Box<BooleanCondition>, Box<BooleanCondition>),

    /// Negated branch
    Not(Box<BooleanCondition>),
}

impl BooleanCondition {
    /// Turn a boolean expression to its string SQL representation.
    pub fn expand(&self) -> String {
        match self {
            Self::None => "true".to_string(),
            Self::Expression(expr) => expr.to_owned(),
            Self::And(lft, rgt) => match (lft.needs_precedence(), rgt.needs_precedence()) {
                (true, false) => format!("({}) and {}", lft.expand(), rgt.expand()),
                (false, true) => format!("{} and ({})", lft.expand(), rgt.expand()),
                (true, true) => format!("({}) and ({})", lft.expand(), rgt.expand()),
                (false, false) => format!("{} and {}", lft.expand(), rgt.expand()),
            },
            Self::Or(lft, rgt) => format!("{} or {}", lft.expand(), rgt.expand()),
            Self::Not(inner) => format!("not ({})", inner.expand()),
        }
    }

    fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    fn needs_precedence(&self) -> bool {
        matches!(self, Self::Or(_, _))
    }
}

/// Where condition builder.
///
/// Parameters placeholders are written `?*` in expressions, they are numbered
/// when the condition is expanded.
#[derive(Debug, Clone)]
pub struct WhereCondition {
    /// Boolean condition internal tree
    condition: BooleanCondition,

    /// Parameters associated to the conditions
    parameters: Vec<Value>,
}

impl Default for WhereCondition {
    fn default() -> Self {
        Self {
            condition: BooleanCondition::None,
            parameters: Vec::new(),
        }
    }
}

impl WhereCondition {
    /// Instanciate a new condition from an expression.
    pub fn new(expression: &str, parameters: Vec<Value>) -> Self {
        Self {
            condition: BooleanCondition::Expression(expression.to_string()),
            parameters,
        }
    }

    /// Turn the condition into a SQL string representation.
    pub fn expand(self) -> (String, Vec<Value>) {
        let (expression, parameters) = self.into_raw();

        (number_placeholders(&expression, |index| format!("?{index}")), parameters)
    }

    /// Turn the condition into a SQL string keeping the `?*` placeholders, so it
    /// can be embedded in a larger statement that is numbered as a whole.
    pub(crate) fn into_raw(self) -> (String, Vec<Value>) {
        (self.condition.expand(), self.parameters)
    }

    /// Return true if no expression was added to this condition.
    pub fn is_empty(&self) -> bool {
        self.condition.is_none()
    }

    /// Instanciate a condition with a `IN` statement.
    pub fn where_in(field: &str, parameters: Vec<Value>) -> Self {
        if parameters.is_empty() {
            return Self::new("false", Vec::new());
        }
        let params: Vec<&str> = repeat_n("?*", parameters.len()).collect();
        let expression = format!("{} in ({})", field, params.join(", "));

        Self {
            condition: BooleanCondition::Expression(expression),
            parameters,
        }
    }

    /// Instanciate a condition checking each `(column, value)` pair for equality.
    ///
    /// `NULL` values are checked with `is null`.
    pub fn where_equals(pairs: &[(String, Value)]) -> Self {
        pairs
            .iter()
            .fold(Self::default(), |condition, (column, value)| {
                let expression = match value {
                    Value::Null => Self::new(&format!("{column} is null"), Vec::new()),
                    value => Self::new(&format!("{column} = ?*"), vec![value.clone()]),
                };
                condition.and_where(expression)
            })
    }

    /// Add a new parameter using a AND operator
    pub fn and_where(mut self, mut condition: WhereCondition) -> Self {
        if condition.condition.is_none() {
            return self;
        }

        if self.condition.is_none() {
            self.condition = condition.condition;
            self.parameters = condition.parameters;
        } else {
            let temp = BooleanCondition::None;
            let my_condition = std::mem::replace(&mut self.condition, temp);
            self.condition =
                BooleanCondition::And(Box::new(my_condition), Box::new(condition.condition));
            self.parameters.append(&mut condition.parameters);
        }

        self
    }

    /// Add a new condition with a OR operator
    pub fn or_where(mut self, mut condition: WhereCondition) -> Self {
        if condition.condition.is_none() {
            return self;
        }
        if self.condition.is_none() {
            self.condition = condition.condition;
            self.parameters = condition.parameters;
        } else {
            let temp = BooleanCondition::None;
            let my_condition = std::mem::replace(&mut self.condition, temp);
            self.condition =
                BooleanCondition::Or(Box::new(my_condition), Box::new(condition.condition));
            self.parameters.append(&mut condition.parameters);
        }

        self
    }

    /// Add the negation of the given condition with a AND operator
    pub fn and_not(self, condition: WhereCondition) -> Self {
        if condition.condition.is_none() {
            return self;
        }

        self.and_where(Self {
            condition: BooleanCondition::Not(Box::new(condition.condition)),
            parameters: condition.parameters,
        })
    }

    /// Wrap the whole condition in a negation
    pub fn negate(self) -> Self {
        if self.condition.is_none() {
            return self;
        }

        Self {
            condition: BooleanCondition::Not(Box::new(self.condition)),
            parameters: self.parameters,
        }
    }
}
