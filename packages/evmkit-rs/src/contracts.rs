//! Contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings for every contract
//! the keeper drives: ERC-20 tokens, the Uniswap V3 quoter and router on L1,
//! the LayerZero-style OFT pools, the OP-stack withdrawal tunnel contracts,
//! and the CoW settlement contract used for pre-signed intent orders.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// Minimal ERC-20 interface
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function transfer(address to, uint256 amount) external returns (bool);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);

        event Transfer(address indexed from, address indexed to, uint256 value);
        event Approval(address indexed owner, address indexed spender, uint256 value);
    }

    /// Uniswap V3 QuoterV2 - reference pricing on L1
    #[sol(rpc)]
    contract IQuoterV2 {
        struct QuoteExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint256 amountIn;
            uint24 fee;
            uint160 sqrtPriceLimitX96;
        }

        function quoteExactInputSingle(QuoteExactInputSingleParams memory params)
            external
            returns (
                uint256 amountOut,
                uint160 sqrtPriceX96After,
                uint32 initializedTicksCrossed,
                uint256 gasEstimate
            );
    }

    /// Uniswap V3 SwapRouter02 - executable leg for reference-provider swaps
    #[sol(rpc)]
    contract ISwapRouter {
        struct ExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint24 fee;
            address recipient;
            uint256 amountIn;
            uint256 amountOutMinimum;
            uint160 sqrtPriceLimitX96;
        }

        function exactInputSingle(ExactInputSingleParams calldata params)
            external
            payable
            returns (uint256 amountOut);
    }

    /// LayerZero-style OFT pool (attested bridge)
    #[sol(rpc)]
    contract IOFT {
        struct SendParam {
            uint32 dstEid;
            bytes32 to;
            uint256 amountLD;
            uint256 minAmountLD;
            bytes extraOptions;
            bytes composeMsg;
            bytes oftCmd;
        }

        struct MessagingFee {
            uint256 nativeFee;
            uint256 lzTokenFee;
        }

        struct MessagingReceipt {
            bytes32 guid;
            uint64 nonce;
            MessagingFee fee;
        }

        struct OFTReceipt {
            uint256 amountSentLD;
            uint256 amountReceivedLD;
        }

        function quoteSend(SendParam calldata sendParam, bool payInLzToken)
            external
            view
            returns (MessagingFee memory fee);

        function send(
            SendParam calldata sendParam,
            MessagingFee calldata fee,
            address refundAddress
        ) external payable returns (MessagingReceipt memory, OFTReceipt memory);

        event OFTSent(
            bytes32 indexed guid,
            uint32 dstEid,
            address indexed fromAddress,
            uint256 amountSentLD,
            uint256 amountReceivedLD
        );
    }

    /// OP-stack L2 standard bridge (tunnel entry on L2)
    #[sol(rpc)]
    contract IL2StandardBridge {
        function withdrawTo(
            address l2Token,
            address to,
            uint256 amount,
            uint32 minGasLimit,
            bytes calldata extraData
        ) external payable;
    }

    /// OP-stack L2 -> L1 message passer; emits the withdrawal identity
    #[sol(rpc)]
    contract IL2ToL1MessagePasser {
        event MessagePassed(
            uint256 indexed nonce,
            address indexed sender,
            address indexed target,
            uint256 value,
            uint256 gasLimit,
            bytes data,
            bytes32 withdrawalHash
        );
    }

    /// OP-stack L2 output oracle on L1
    #[sol(rpc)]
    contract IL2OutputOracle {
        struct OutputProposal {
            bytes32 outputRoot;
            uint128 timestamp;
            uint128 l2BlockNumber;
        }

        function latestBlockNumber() external view returns (uint256);
        function getL2OutputIndexAfter(uint256 l2BlockNumber) external view returns (uint256);
        function getL2Output(uint256 l2OutputIndex) external view returns (OutputProposal memory);
    }

    /// OP-stack portal on L1 (tunnel exit: prove + finalize)
    #[sol(rpc)]
    contract IOptimismPortal {
        struct WithdrawalTransaction {
            uint256 nonce;
            address sender;
            address target;
            uint256 value;
            uint256 gasLimit;
            bytes data;
        }

        struct OutputRootProof {
            bytes32 version;
            bytes32 stateRoot;
            bytes32 messagePasserStorageRoot;
            bytes32 latestBlockhash;
        }

        struct ProvenWithdrawal {
            bytes32 outputRoot;
            uint128 timestamp;
            uint128 l2OutputIndex;
        }

        function proveWithdrawalTransaction(
            WithdrawalTransaction memory tx,
            uint256 l2OutputIndex,
            OutputRootProof calldata outputRootProof,
            bytes[] calldata withdrawalProof
        ) external;

        function finalizeWithdrawalTransaction(WithdrawalTransaction memory tx) external;

        function provenWithdrawals(bytes32 withdrawalHash)
            external
            view
            returns (ProvenWithdrawal memory);

        function finalizedWithdrawals(bytes32 withdrawalHash) external view returns (bool);

        event WithdrawalProven(
            bytes32 indexed withdrawalHash,
            address indexed from,
            address indexed to
        );

        event WithdrawalFinalized(bytes32 indexed withdrawalHash, bool success);
    }

    /// CoW settlement contract - pre-signature for intent orders
    #[sol(rpc)]
    contract ICowSettlement {
        function setPreSignature(bytes calldata orderUid, bool signed) external;

        event PreSignature(address indexed owner, bytes orderUid, bool signed);
    }
}
