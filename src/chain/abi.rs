//! Solidity interfaces of the contracts the saga talks to.

use alloy_sol_types::sol;

sol! {
    /// ENS .eth registrar controller (commit/reveal).
    #[derive(Debug, PartialEq, Eq)]
    interface IETHRegistrarController {
        struct Price {
            uint256 base;
            uint256 premium;
        }

        function rentPrice(string name, uint256 duration) external view returns (Price memory price);

        function makeCommitment(
            string name,
            address owner,
            uint256 duration,
            bytes32 secret,
            address resolver,
            bytes[] data,
            bool reverseRecord,
            uint16 ownerControlledFuses
        ) external pure returns (bytes32 commitment);

        function commit(bytes32 commitment) external;

        function register(
            string name,
            address owner,
            uint256 duration,
            bytes32 secret,
            address resolver,
            bytes[] data,
            bool reverseRecord,
            uint16 ownerControlledFuses
        ) external payable;
    }

    #[derive(Debug, PartialEq, Eq)]
    interface INameWrapper {
        function ownerOf(uint256 id) external view returns (address owner);
    }

    #[derive(Debug, PartialEq, Eq)]
    interface IENSRegistry {
        function owner(bytes32 node) external view returns (address owner);
    }

    #[derive(Debug, PartialEq, Eq)]
    interface ISafeProxyFactory {
        event ProxyCreation(address indexed proxy, address singleton);

        function createProxyWithNonce(
            address singleton,
            bytes initializer,
            uint256 saltNonce
        ) external returns (address proxy);

        function proxyCreationCode() external pure returns (bytes memory code);
    }

    #[derive(Debug, PartialEq, Eq)]
    interface ISafe {
        function setup(
            address[] owners,
            uint256 threshold,
            address to,
            bytes data,
            address fallbackHandler,
            address paymentToken,
            uint256 payment,
            address paymentReceiver
        ) external;
    }

    /// Company registry linking a name to its treasury and founders.
    #[derive(Debug, PartialEq, Eq)]
    interface ICompanyRegistry {
        struct FounderShare {
            address wallet;
            uint16 equityBps;
            string role;
        }

        struct Company {
            string name;
            address safe;
            FounderShare[] founders;
            uint8 threshold;
            uint64 registeredAt;
        }

        function companyByName(string name) external view returns (Company memory company, bool exists);

        function registrationFee() external view returns (uint256 fee);

        function registerCompany(
            string name,
            address safe,
            FounderShare[] founders,
            uint8 threshold
        ) external payable;
    }
}
